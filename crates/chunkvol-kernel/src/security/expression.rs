//! Textual access-control expressions.
//!
//! ```text
//! expression := component*
//! component  := "O:" principal | "G:" principal | "D:" dacl-flags ace*
//! dacl-flags := ("P" | "AI" | "AR")*
//! ace        := "(" type ";" flags ";" rights ";" ";" ";" principal ")"
//! principal  := alias | "S-1-" authority ("-" sub)*
//! ```
//!
//! Parsing produces a stream of [`Component`] values which are then folded
//! into the descriptor parts, each component allowed once.

use super::{Ace, AceType, Dacl, DaclFlags, SecurityError, Sid, ace_flags};

/// Named rights masks. Rendering picks the first exact match.
const RIGHTS: &[(&str, u32)] = &[
    ("GA", 0x1000_0000),
    ("GR", 0x8000_0000),
    ("GW", 0x4000_0000),
    ("GX", 0x2000_0000),
    ("FA", 0x001F_01FF),
    ("FR", 0x0012_0089),
    ("FW", 0x0012_0116),
    ("FX", 0x0012_00A0),
    ("KA", 0x000F_003F),
    ("KR", 0x0002_0019),
    ("KW", 0x0002_0006),
    ("KX", 0x0002_0019),
    ("RC", 0x0002_0000),
    ("SD", 0x0001_0000),
    ("WD", 0x0004_0000),
    ("WO", 0x0008_0000),
    ("CC", 0x0000_0001),
    ("DC", 0x0000_0002),
    ("LC", 0x0000_0004),
    ("SW", 0x0000_0008),
    ("RP", 0x0000_0010),
    ("WP", 0x0000_0020),
    ("DT", 0x0000_0040),
    ("LO", 0x0000_0080),
    ("CR", 0x0000_0100),
];

/// ACE flag tokens in rendering order.
const FLAGS: &[(&str, u8)] = &[
    ("OI", ace_flags::OBJECT_INHERIT),
    ("CI", ace_flags::CONTAINER_INHERIT),
    ("NP", ace_flags::NO_PROPAGATE_INHERIT),
    ("IO", ace_flags::INHERIT_ONLY),
    ("ID", ace_flags::INHERITED),
];

/// One parsed top-level component.
#[derive(Debug)]
enum Component {
    Owner(Sid),
    Group(Sid),
    Dacl(Dacl),
}

/// The parts of a parsed expression.
#[derive(Debug, Default)]
pub(crate) struct ParsedExpression {
    pub owner: Option<Sid>,
    pub group: Option<Sid>,
    pub dacl: Option<Dacl>,
}

pub(crate) fn parse(text: &str) -> Result<ParsedExpression, SecurityError> {
    let mut parser = Parser { text, pos: 0 };
    let mut parsed = ParsedExpression::default();

    while parser.pos < text.len() {
        let start = parser.pos;
        match parser.component()? {
            Component::Owner(sid) => set_once(&mut parsed.owner, sid, start, "O:")?,
            Component::Group(sid) => set_once(&mut parsed.group, sid, start, "G:")?,
            Component::Dacl(dacl) => set_once(&mut parsed.dacl, dacl, start, "D:")?,
        }
    }

    Ok(parsed)
}

fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    position: usize,
    tag: &str,
) -> Result<(), SecurityError> {
    if slot.is_some() {
        return Err(SecurityError::parse(position, format!("duplicate {tag} component")));
    }
    *slot = Some(value);
    Ok(())
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn component(&mut self) -> Result<Component, SecurityError> {
        let start = self.pos;
        let rest = self.rest();
        if rest.starts_with("O:") {
            self.pos += 2;
            Ok(Component::Owner(self.principal()?))
        } else if rest.starts_with("G:") {
            self.pos += 2;
            Ok(Component::Group(self.principal()?))
        } else if rest.starts_with("D:") {
            self.pos += 2;
            Ok(Component::Dacl(self.dacl()?))
        } else if rest.starts_with("S:") {
            Err(SecurityError::parse(start, "SACL components are not supported"))
        } else {
            Err(SecurityError::parse(start, "expected O:, G: or D: component"))
        }
    }

    /// A principal directly followed by more expression text.
    fn principal(&mut self) -> Result<Sid, SecurityError> {
        let start = self.pos;
        let rest = self.rest();
        if rest.starts_with("S-") {
            let (sid, used) = Sid::parse_literal_prefix(rest)
                .ok_or_else(|| SecurityError::parse(start, "malformed SID"))?;
            self.pos += used;
            return Ok(sid);
        }
        let alias = rest.get(..2).filter(|a| a.chars().all(|c| c.is_ascii_uppercase()));
        let Some(alias) = alias else {
            return Err(SecurityError::parse(start, "expected principal"));
        };
        self.pos += 2;
        lookup_alias(alias, start)
    }

    fn dacl(&mut self) -> Result<Dacl, SecurityError> {
        let mut flags = DaclFlags::default();
        loop {
            let rest = self.rest();
            if rest.starts_with("AI") {
                flags.auto_inherited = true;
                self.pos += 2;
            } else if rest.starts_with("AR") {
                flags.auto_inherit_req = true;
                self.pos += 2;
            } else if rest.starts_with('P') {
                flags.protected = true;
                self.pos += 1;
            } else {
                break;
            }
        }

        let mut aces = Vec::new();
        while self.rest().starts_with('(') {
            aces.push(self.ace()?);
        }
        Ok(Dacl { flags, aces })
    }

    fn ace(&mut self) -> Result<Ace, SecurityError> {
        let start = self.pos;
        let close = self
            .rest()
            .find(')')
            .map(|i| self.pos + i)
            .ok_or_else(|| SecurityError::parse(start, "unterminated ACE"))?;
        let body = &self.text[start + 1..close];

        let mut fields = Vec::with_capacity(6);
        let mut offset = start + 1;
        for field in body.split(';') {
            fields.push((offset, field));
            offset += field.len() + 1;
        }
        if fields.len() != 6 {
            return Err(SecurityError::parse(
                start,
                format!("ACE has {} fields, expected 6", fields.len()),
            ));
        }

        let (type_pos, kind) = fields[0];
        let kind = match kind {
            "A" => AceType::Allow,
            "D" => AceType::Deny,
            other => {
                return Err(SecurityError::parse(
                    type_pos,
                    format!("unsupported ACE type {other:?}"),
                ));
            }
        };
        let flags = parse_flags(fields[1].1, fields[1].0)?;
        let mask = parse_rights(fields[2].1, fields[2].0)?;
        for (pos, guid) in &fields[3..5] {
            if !guid.is_empty() {
                return Err(SecurityError::parse(*pos, "object ACEs are not supported"));
            }
        }
        let (sid_pos, sid) = fields[5];
        let sid = parse_whole_principal(sid, sid_pos)?;

        self.pos = close + 1;
        Ok(Ace {
            kind,
            flags,
            mask,
            sid,
        })
    }
}

fn lookup_alias(alias: &str, position: usize) -> Result<Sid, SecurityError> {
    Sid::from_alias(alias).ok_or_else(|| SecurityError::UnknownPrincipal {
        position,
        name: alias.to_string(),
    })
}

fn parse_whole_principal(text: &str, position: usize) -> Result<Sid, SecurityError> {
    if text.starts_with("S-") {
        return Sid::parse_literal(text)
            .ok_or_else(|| SecurityError::parse(position, "malformed SID"));
    }
    if text.len() == 2 && text.chars().all(|c| c.is_ascii_uppercase()) {
        return lookup_alias(text, position);
    }
    Err(SecurityError::parse(position, "expected principal"))
}

fn two_letter_tokens(text: &str, position: usize) -> Result<Vec<(usize, &str)>, SecurityError> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return Err(SecurityError::parse(position, format!("malformed token list {text:?}")));
    }
    Ok((0..text.len())
        .step_by(2)
        .map(|i| (position + i, &text[i..i + 2]))
        .collect())
}

fn parse_flags(text: &str, position: usize) -> Result<u8, SecurityError> {
    let mut flags = 0;
    for (pos, token) in two_letter_tokens(text, position)? {
        let (_, bit) = FLAGS
            .iter()
            .find(|(name, _)| *name == token)
            .ok_or_else(|| SecurityError::parse(pos, format!("unknown ACE flag {token:?}")))?;
        flags |= bit;
    }
    Ok(flags)
}

fn parse_rights(text: &str, position: usize) -> Result<u32, SecurityError> {
    if text.is_empty() {
        return Err(SecurityError::parse(position, "missing rights"));
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16)
            .map_err(|_| SecurityError::parse(position, format!("bad rights mask {text:?}")));
    }
    let mut mask = 0;
    for (pos, token) in two_letter_tokens(text, position)? {
        let (_, bits) = RIGHTS
            .iter()
            .find(|(name, _)| *name == token)
            .ok_or_else(|| SecurityError::parse(pos, format!("unknown right {token:?}")))?;
        mask |= bits;
    }
    Ok(mask)
}

fn render_flags(flags: u8) -> String {
    FLAGS
        .iter()
        .filter(|(_, bit)| flags & bit != 0)
        .map(|(name, _)| *name)
        .collect()
}

fn render_rights(mask: u32) -> String {
    match RIGHTS.iter().find(|(_, bits)| *bits == mask) {
        Some((name, _)) => name.to_string(),
        None => format!("{mask:#x}"),
    }
}

/// Canonical text: owner, group, DACL; flags and rights in fixed order.
pub(crate) fn render(owner: Option<&Sid>, group: Option<&Sid>, dacl: Option<&Dacl>) -> String {
    let mut out = String::new();
    if let Some(owner) = owner {
        out.push_str(&format!("O:{owner}"));
    }
    if let Some(group) = group {
        out.push_str(&format!("G:{group}"));
    }
    if let Some(dacl) = dacl {
        out.push_str("D:");
        if dacl.flags.protected {
            out.push('P');
        }
        if dacl.flags.auto_inherit_req {
            out.push_str("AR");
        }
        if dacl.flags.auto_inherited {
            out.push_str("AI");
        }
        for ace in &dacl.aces {
            let kind = match ace.kind {
                AceType::Allow => "A",
                AceType::Deny => "D",
            };
            out.push_str(&format!(
                "({kind};{};{};;;{})",
                render_flags(ace.flags),
                render_rights(ace.mask),
                ace.sid
            ));
        }
    }
    out
}
