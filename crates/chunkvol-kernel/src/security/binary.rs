//! Self-relative binary descriptor codec.

use std::io::{self, Cursor, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{
    Ace, AceType, Dacl, DaclFlags, MAX_DESCRIPTOR_SIZE, MAX_SUB_AUTHORITIES,
    SE_DACL_AUTO_INHERIT_REQ, SE_DACL_AUTO_INHERITED, SE_DACL_PRESENT, SE_DACL_PROTECTED,
    SE_SELF_RELATIVE, SecurityError, Sid,
};

const HEADER_LEN: usize = 20;
const ACL_HEADER_LEN: usize = 8;
const ACE_HEADER_LEN: usize = 8;
const DESCRIPTOR_REVISION: u8 = 1;
const SID_REVISION: u8 = 1;
const ACL_REVISION: u8 = 2;
const ACL_REVISION_DS: u8 = 4;

fn ace_len(ace: &Ace) -> usize {
    ACE_HEADER_LEN + ace.sid.encoded_len()
}

fn acl_len(dacl: &Dacl) -> usize {
    ACL_HEADER_LEN + dacl.aces.iter().map(ace_len).sum::<usize>()
}

fn control_bits(dacl: Option<&Dacl>) -> u16 {
    let mut control = SE_SELF_RELATIVE;
    if let Some(dacl) = dacl {
        control |= SE_DACL_PRESENT;
        if dacl.flags.protected {
            control |= SE_DACL_PROTECTED;
        }
        if dacl.flags.auto_inherited {
            control |= SE_DACL_AUTO_INHERITED;
        }
        if dacl.flags.auto_inherit_req {
            control |= SE_DACL_AUTO_INHERIT_REQ;
        }
    }
    control
}

/// Encode in the order header, DACL, owner, group.
pub(crate) fn encode(
    owner: Option<&Sid>,
    group: Option<&Sid>,
    dacl: Option<&Dacl>,
) -> Result<Vec<u8>, SecurityError> {
    let dacl_len = dacl.map_or(0, acl_len);
    let owner_len = owner.map_or(0, Sid::encoded_len);
    let group_len = group.map_or(0, Sid::encoded_len);
    let size = HEADER_LEN + dacl_len + owner_len + group_len;
    if size > MAX_DESCRIPTOR_SIZE {
        return Err(SecurityError::DescriptorTooLarge {
            size,
            max: MAX_DESCRIPTOR_SIZE,
        });
    }

    let offset_of = |present: bool, at: usize| if present { at as u32 } else { 0 };
    let dacl_offset = offset_of(dacl.is_some(), HEADER_LEN);
    let owner_offset = offset_of(owner.is_some(), HEADER_LEN + dacl_len);
    let group_offset = offset_of(group.is_some(), HEADER_LEN + dacl_len + owner_len);

    let mut out = Vec::with_capacity(size);
    write_descriptor(
        &mut out,
        control_bits(dacl),
        [owner_offset, group_offset, dacl_offset],
        owner,
        group,
        dacl,
    )
    .map_err(|e| SecurityError::binary(out.len(), e.to_string()))?;
    debug_assert_eq!(out.len(), size);
    Ok(out)
}

fn write_descriptor(
    out: &mut Vec<u8>,
    control: u16,
    [owner_offset, group_offset, dacl_offset]: [u32; 3],
    owner: Option<&Sid>,
    group: Option<&Sid>,
    dacl: Option<&Dacl>,
) -> io::Result<()> {
    out.write_u8(DESCRIPTOR_REVISION)?;
    out.write_u8(0)?;
    out.write_u16::<LittleEndian>(control)?;
    out.write_u32::<LittleEndian>(owner_offset)?;
    out.write_u32::<LittleEndian>(group_offset)?;
    out.write_u32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(dacl_offset)?;

    if let Some(dacl) = dacl {
        write_acl(out, dacl)?;
    }
    if let Some(owner) = owner {
        write_sid(out, owner)?;
    }
    if let Some(group) = group {
        write_sid(out, group)?;
    }
    Ok(())
}

fn write_acl<W: Write>(out: &mut W, dacl: &Dacl) -> io::Result<()> {
    // Bounded by MAX_DESCRIPTOR_SIZE, checked by the caller.
    out.write_u8(ACL_REVISION)?;
    out.write_u8(0)?;
    out.write_u16::<LittleEndian>(acl_len(dacl) as u16)?;
    out.write_u16::<LittleEndian>(dacl.aces.len() as u16)?;
    out.write_u16::<LittleEndian>(0)?;
    for ace in &dacl.aces {
        out.write_u8(ace.kind.to_byte())?;
        out.write_u8(ace.flags)?;
        out.write_u16::<LittleEndian>(ace_len(ace) as u16)?;
        out.write_u32::<LittleEndian>(ace.mask)?;
        write_sid(out, &ace.sid)?;
    }
    Ok(())
}

fn write_sid<W: Write>(out: &mut W, sid: &Sid) -> io::Result<()> {
    out.write_u8(SID_REVISION)?;
    out.write_u8(sid.sub_authorities().len() as u8)?;
    out.write_u48::<BigEndian>(sid.authority())?;
    for sub in sid.sub_authorities() {
        out.write_u32::<LittleEndian>(*sub)?;
    }
    Ok(())
}

type Decoded = (Option<Sid>, Option<Sid>, Option<Dacl>);

/// Decode and validate. Parts may sit at any in-bounds offset.
pub(crate) fn decode(bytes: &[u8]) -> Result<Decoded, SecurityError> {
    if bytes.len() > MAX_DESCRIPTOR_SIZE {
        return Err(SecurityError::DescriptorTooLarge {
            size: bytes.len(),
            max: MAX_DESCRIPTOR_SIZE,
        });
    }
    if bytes.len() < HEADER_LEN {
        return Err(SecurityError::binary(0, "truncated header"));
    }

    let mut header = Cursor::new(bytes);
    let truncated = |_| SecurityError::binary(0, "truncated header");
    let revision = header.read_u8().map_err(truncated)?;
    if revision != DESCRIPTOR_REVISION {
        return Err(SecurityError::binary(0, format!("unsupported revision {revision}")));
    }
    let _sbz1 = header.read_u8().map_err(truncated)?;
    let control = header.read_u16::<LittleEndian>().map_err(truncated)?;
    let owner_offset = header.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let group_offset = header.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let sacl_offset = header.read_u32::<LittleEndian>().map_err(truncated)?;
    let dacl_offset = header.read_u32::<LittleEndian>().map_err(truncated)? as usize;

    if control & SE_SELF_RELATIVE == 0 {
        return Err(SecurityError::binary(2, "descriptor is not self-relative"));
    }
    if sacl_offset != 0 {
        return Err(SecurityError::binary(12, "SACLs are not supported"));
    }
    let dacl_present = control & SE_DACL_PRESENT != 0;
    if dacl_present && dacl_offset == 0 {
        return Err(SecurityError::binary(16, "DACL present without an offset"));
    }
    if !dacl_present && dacl_offset != 0 {
        return Err(SecurityError::binary(16, "DACL offset without SE_DACL_PRESENT"));
    }

    let owner = (owner_offset != 0)
        .then(|| read_sid_at(bytes, owner_offset))
        .transpose()?;
    let group = (group_offset != 0)
        .then(|| read_sid_at(bytes, group_offset))
        .transpose()?;
    let dacl = if dacl_present {
        let flags = DaclFlags {
            protected: control & SE_DACL_PROTECTED != 0,
            auto_inherited: control & SE_DACL_AUTO_INHERITED != 0,
            auto_inherit_req: control & SE_DACL_AUTO_INHERIT_REQ != 0,
        };
        Some(read_acl_at(bytes, dacl_offset, flags)?)
    } else {
        None
    };

    Ok((owner, group, dacl))
}

fn read_sid_at(bytes: &[u8], offset: usize) -> Result<Sid, SecurityError> {
    let truncated = |_| SecurityError::binary(offset, "truncated SID");
    let mut reader = Cursor::new(bytes.get(offset..).ok_or_else(|| {
        SecurityError::binary(offset, "SID offset past end of descriptor")
    })?);

    let revision = reader.read_u8().map_err(truncated)?;
    if revision != SID_REVISION {
        return Err(SecurityError::binary(offset, format!("bad SID revision {revision}")));
    }
    let count = usize::from(reader.read_u8().map_err(truncated)?);
    if count > MAX_SUB_AUTHORITIES {
        return Err(SecurityError::binary(offset, format!("SID has {count} sub-authorities")));
    }
    let authority = reader.read_u48::<BigEndian>().map_err(truncated)?;
    let subs = (0..count)
        .map(|_| reader.read_u32::<LittleEndian>().map_err(truncated))
        .collect::<Result<Vec<_>, _>>()?;

    Sid::new(authority, subs).ok_or_else(|| SecurityError::binary(offset, "invalid SID"))
}

fn read_acl_at(bytes: &[u8], offset: usize, flags: DaclFlags) -> Result<Dacl, SecurityError> {
    let truncated = |_| SecurityError::binary(offset, "truncated ACL header");
    let mut reader = Cursor::new(bytes.get(offset..).ok_or_else(|| {
        SecurityError::binary(offset, "ACL offset past end of descriptor")
    })?);

    let revision = reader.read_u8().map_err(truncated)?;
    if revision != ACL_REVISION && revision != ACL_REVISION_DS {
        return Err(SecurityError::binary(offset, format!("bad ACL revision {revision}")));
    }
    let _sbz1 = reader.read_u8().map_err(truncated)?;
    let size = usize::from(reader.read_u16::<LittleEndian>().map_err(truncated)?);
    let count = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let _sbz2 = reader.read_u16::<LittleEndian>().map_err(truncated)?;

    let end = offset + size;
    if size < ACL_HEADER_LEN || end > bytes.len() {
        return Err(SecurityError::binary(offset, format!("ACL size {size} out of bounds")));
    }

    let mut aces = Vec::with_capacity(usize::from(count));
    let mut pos = offset + ACL_HEADER_LEN;
    for _ in 0..count {
        let bad = |reason: &str| SecurityError::binary(pos, reason.to_string());
        let mut ace = Cursor::new(bytes.get(pos..end).ok_or_else(|| bad("ACE past end of ACL"))?);
        let kind = ace.read_u8().map_err(|_| bad("truncated ACE"))?;
        let kind = AceType::from_byte(kind)
            .ok_or_else(|| {
                SecurityError::binary(pos, format!("unsupported ACE type {kind:#04x}"))
            })?;
        let ace_flags = ace.read_u8().map_err(|_| bad("truncated ACE"))?;
        let ace_size = ace
            .read_u16::<LittleEndian>()
            .map_err(|_| bad("truncated ACE"))?;
        let ace_size = usize::from(ace_size);
        let mask = ace.read_u32::<LittleEndian>().map_err(|_| bad("truncated ACE"))?;
        if ace_size < ACE_HEADER_LEN || pos + ace_size > end {
            return Err(bad("ACE size out of bounds"));
        }

        let sid = read_sid_at(&bytes[..pos + ace_size], pos + ACE_HEADER_LEN)?;
        aces.push(Ace {
            kind,
            flags: ace_flags,
            mask,
            sid,
        });
        pos += ace_size;
    }

    Ok(Dacl { flags, aces })
}
