//! Security identifiers.

use std::fmt;

/// Most sub-authorities a SID may carry.
pub const MAX_SUB_AUTHORITIES: usize = 15;

/// Two-letter principal aliases and the SIDs they stand for.
///
/// Rendering prefers the first alias listed for a SID.
const ALIASES: &[(&str, u64, &[u32])] = &[
    ("SY", 5, &[18]),
    ("BA", 5, &[32, 544]),
    ("BU", 5, &[32, 545]),
    ("BG", 5, &[32, 546]),
    ("PU", 5, &[32, 547]),
    ("WD", 1, &[0]),
    ("AU", 5, &[11]),
    ("AN", 5, &[7]),
    ("CO", 3, &[0]),
    ("CG", 3, &[1]),
    ("OW", 3, &[4]),
    ("NS", 5, &[20]),
    ("LS", 5, &[19]),
    ("IU", 5, &[4]),
    ("SU", 5, &[6]),
    ("NU", 5, &[2]),
    ("RC", 5, &[12]),
    ("ED", 5, &[9]),
    ("PS", 5, &[10]),
    ("AC", 15, &[2, 1]),
];

/// A security identifier: a 48-bit authority and up to 15 sub-authorities.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Returns `None` when the authority exceeds 48 bits or there are too many
    /// sub-authorities.
    pub fn new(authority: u64, sub_authorities: Vec<u32>) -> Option<Self> {
        if authority >= 1 << 48 || sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return None;
        }
        Some(Self {
            authority,
            sub_authorities,
        })
    }

    /// Look up a two-letter alias such as `SY` or `BA`.
    pub fn from_alias(alias: &str) -> Option<Self> {
        ALIASES
            .iter()
            .find(|(name, _, _)| *name == alias)
            .map(|(_, authority, subs)| Self {
                authority: *authority,
                sub_authorities: subs.to_vec(),
            })
    }

    /// The alias for this SID, when it has one.
    pub fn alias(&self) -> Option<&'static str> {
        ALIASES
            .iter()
            .find(|(_, authority, subs)| {
                *authority == self.authority && *subs == self.sub_authorities.as_slice()
            })
            .map(|(name, _, _)| *name)
    }

    /// Parse the `S-1-…` literal form. The whole string must be consumed.
    pub fn parse_literal(text: &str) -> Option<Self> {
        let (sid, used) = Self::parse_literal_prefix(text)?;
        (used == text.len()).then_some(sid)
    }

    /// Parse an `S-1-…` literal at the start of `text`, returning the SID and
    /// the number of bytes consumed.
    pub(crate) fn parse_literal_prefix(text: &str) -> Option<(Self, usize)> {
        let rest = text.strip_prefix("S-1-")?;
        let mut used = 4;

        let hex = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"));
        let (authority, n) = if let Some(hex) = hex {
            let digits = hex.chars().take_while(|c| c.is_ascii_hexdigit()).count();
            (u64::from_str_radix(&hex[..digits], 16).ok()?, digits + 2)
        } else {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            (rest[..digits].parse::<u64>().ok()?, digits)
        };
        used += n;

        let mut subs = Vec::new();
        loop {
            let tail = &text[used..];
            let Some(after_dash) = tail.strip_prefix('-') else {
                break;
            };
            let digits = after_dash.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                break;
            }
            subs.push(after_dash[..digits].parse::<u32>().ok()?);
            used += 1 + digits;
        }

        Some((Self::new(authority, subs)?, used))
    }

    pub fn authority(&self) -> u64 {
        self.authority
    }

    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        8 + 4 * self.sub_authorities.len()
    }
}

impl fmt::Display for Sid {
    /// Alias when one exists, otherwise the literal form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = self.alias() {
            return f.write_str(alias);
        }
        if self.authority >= 1 << 32 {
            write!(f, "S-1-0x{:012X}", self.authority)?;
        } else {
            write!(f, "S-1-{}", self.authority)?;
        }
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_round_trip() {
        let sid = Sid::from_alias("BA").unwrap();
        assert_eq!(sid.sub_authorities(), &[32, 544]);
        assert_eq!(sid.to_string(), "BA");
        assert!(Sid::from_alias("ZZ").is_none());
    }

    #[test]
    fn test_literal_matching_alias_renders_alias() {
        let sid = Sid::parse_literal("S-1-5-18").unwrap();
        assert_eq!(sid.to_string(), "SY");
    }

    #[test]
    fn test_literal_without_alias() {
        let sid = Sid::parse_literal("S-1-5-21-1004336348-1177238915-682003330-512").unwrap();
        assert_eq!(sid.to_string(), "S-1-5-21-1004336348-1177238915-682003330-512");
        assert_eq!(sid.encoded_len(), 8 + 4 * 5);
    }

    #[test]
    fn test_literal_prefix_stops_at_component() {
        let (sid, used) = Sid::parse_literal_prefix("S-1-5-32-544G:SY").unwrap();
        assert_eq!(used, 12);
        assert_eq!(sid.alias(), Some("BA"));
    }

    #[test]
    fn test_hex_authority() {
        let sid = Sid::parse_literal("S-1-0x1000000000FF-7").unwrap();
        assert_eq!(sid.authority(), 0x1000000000FF);
        assert_eq!(sid.to_string(), "S-1-0x1000000000FF-7");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Sid::parse_literal("S-2-5").is_none());
        assert!(Sid::parse_literal("S-1-").is_none());
        assert!(Sid::parse_literal("S-1-5-x").is_none());
        assert!(Sid::parse_literal("S-1-5-99999999999").is_none());
        let too_many = format!("S-1-5{}", "-1".repeat(16));
        assert!(Sid::parse_literal(&too_many).is_none());
    }
}
