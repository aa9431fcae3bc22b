//! Assembly identity extraction.
//!
//! Reads the strong name (simple name, version, culture, public key token)
//! straight out of a managed module's own metadata tables. This is a pure
//! byte-level reader over the PE/CLI format: nothing from the module is
//! executed or loaded into any process-wide namespace, so two same-named
//! modules of different versions resolve independently and repeated calls
//! accumulate no state.
//!
//! The walk: DOS header -> PE headers -> CLI data directory -> metadata
//! root -> `#~`/`#Strings`/`#Blob` streams -> Assembly table row. Table
//! rows in front of the Assembly table are skipped by size, which requires
//! the full column layout of every preceding table (heap-size bits, simple
//! and coded index widths).

use nupull_schema::{AssemblyIdentity, PackageVersion};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// The module bytes violate the binary format somewhere on the path to
/// the assembly manifest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed module: {0}")]
pub struct MalformedModule(pub &'static str);

type Result<T> = std::result::Result<T, MalformedModule>;

fn slice_at<'a>(data: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8]> {
    data.get(offset..offset.checked_add(len).ok_or(MalformedModule("offset overflow"))?)
        .ok_or(MalformedModule("truncated module"))
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16> {
    let b = slice_at(data, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32> {
    let b = slice_at(data, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn u64_at(data: &[u8], offset: usize) -> Result<u64> {
    let b = slice_at(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Section table entry: maps virtual addresses to file offsets.
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_offset: u32,
    raw_size: u32,
}

fn rva_to_offset(sections: &[Section], rva: u32) -> Result<usize> {
    for s in sections {
        let span = s.virtual_size.max(s.raw_size);
        if rva >= s.virtual_address && rva < s.virtual_address.saturating_add(span) {
            return Ok((rva - s.virtual_address + s.raw_offset) as usize);
        }
    }
    Err(MalformedModule("RVA outside all sections"))
}

/// Extract the assembly identity from raw module bytes.
///
/// # Errors
///
/// Returns [`MalformedModule`] when the bytes are not a managed module or
/// any structure on the path to the Assembly table is out of shape.
pub fn read_identity(bytes: &[u8]) -> std::result::Result<AssemblyIdentity, MalformedModule> {
    if slice_at(bytes, 0, 2)? != b"MZ" {
        return Err(MalformedModule("missing MZ signature"));
    }
    let e_lfanew = u32_at(bytes, 0x3C)? as usize;
    if slice_at(bytes, e_lfanew, 4)? != b"PE\0\0" {
        return Err(MalformedModule("missing PE signature"));
    }

    let coff = e_lfanew + 4;
    let num_sections = u16_at(bytes, coff + 2)? as usize;
    let opt_size = u16_at(bytes, coff + 16)? as usize;
    let opt = coff + 20;

    let (dir_count_off, dirs_off) = match u16_at(bytes, opt)? {
        0x10B => (92, 96),   // PE32
        0x20B => (108, 112), // PE32+
        _ => return Err(MalformedModule("unknown optional header magic")),
    };
    if u32_at(bytes, opt + dir_count_off)? < 15 {
        return Err(MalformedModule("no CLI data directory"));
    }
    let clr_rva = u32_at(bytes, opt + dirs_off + 14 * 8)?;
    if clr_rva == 0 {
        return Err(MalformedModule("not a managed module"));
    }

    let mut sections = Vec::with_capacity(num_sections);
    for i in 0..num_sections {
        let s = opt + opt_size + i * 40;
        sections.push(Section {
            virtual_size: u32_at(bytes, s + 8)?,
            virtual_address: u32_at(bytes, s + 12)?,
            raw_size: u32_at(bytes, s + 16)?,
            raw_offset: u32_at(bytes, s + 20)?,
        });
    }

    let clr = rva_to_offset(&sections, clr_rva)?;
    let meta_rva = u32_at(bytes, clr + 8)?;
    let md = rva_to_offset(&sections, meta_rva)?;

    if u32_at(bytes, md)? != 0x424A_5342 {
        return Err(MalformedModule("bad metadata signature"));
    }
    let version_len = u32_at(bytes, md + 12)? as usize;
    let streams_off = md + 16 + version_len;
    let n_streams = u16_at(bytes, streams_off + 2)? as usize;

    let mut tables = None;
    let mut strings = None;
    let mut blobs = None;

    let mut pos = streams_off + 4;
    for _ in 0..n_streams {
        let offset = u32_at(bytes, pos)? as usize;
        let _size = u32_at(bytes, pos + 4)?;
        pos += 8;
        let name_start = pos;
        while *slice_at(bytes, pos, 1)?.first().unwrap_or(&0) != 0 {
            pos += 1;
        }
        let name = slice_at(bytes, name_start, pos - name_start)?;
        // Stream names pad to a 4-byte boundary, nul included.
        pos = name_start + ((pos - name_start + 1).div_ceil(4)) * 4;

        match name {
            b"#~" | b"#-" => tables = Some(md + offset),
            b"#Strings" => strings = Some(md + offset),
            b"#Blob" => blobs = Some(md + offset),
            _ => {}
        }
    }

    let tables = tables.ok_or(MalformedModule("no metadata tables stream"))?;
    let strings = strings.ok_or(MalformedModule("no strings heap"))?;
    let blobs = blobs.ok_or(MalformedModule("no blob heap"))?;

    read_assembly_row(bytes, tables, strings, blobs)
}

const ASSEMBLY_TABLE: usize = 0x20;

fn read_assembly_row(
    bytes: &[u8],
    tables: usize,
    strings: usize,
    blobs: usize,
) -> std::result::Result<AssemblyIdentity, MalformedModule> {
    let heap_sizes = *slice_at(bytes, tables + 6, 1)?.first().unwrap_or(&0);
    let valid = u64_at(bytes, tables + 8)?;
    if valid & (1 << ASSEMBLY_TABLE) == 0 {
        return Err(MalformedModule("module carries no assembly manifest"));
    }

    let mut rows = [0u32; 64];
    let mut pos = tables + 24;
    for (id, count) in rows.iter_mut().enumerate() {
        if valid & (1 << id) != 0 {
            *count = u32_at(bytes, pos)?;
            pos += 4;
        }
    }

    let ctx = SizeCtx {
        rows,
        str_wide: heap_sizes & 0x1 != 0,
        guid_wide: heap_sizes & 0x2 != 0,
        blob_wide: heap_sizes & 0x4 != 0,
    };

    // Skip every populated table in front of the Assembly table.
    for id in 0..ASSEMBLY_TABLE {
        if valid & (1 << id) != 0 {
            let size = row_size(id, &ctx).ok_or(MalformedModule("unsupported metadata table"))?;
            pos += rows[id] as usize * size;
        }
    }

    // Assembly row: HashAlgId, 4x version, Flags, PublicKey, Name, Culture.
    pos += 4;
    let major = u16_at(bytes, pos)?;
    let minor = u16_at(bytes, pos + 2)?;
    let build = u16_at(bytes, pos + 4)?;
    let revision = u16_at(bytes, pos + 6)?;
    pos += 8 + 4;

    let (public_key_idx, n) = read_heap_idx(bytes, pos, ctx.blob_wide)?;
    pos += n;
    let (name_idx, n) = read_heap_idx(bytes, pos, ctx.str_wide)?;
    pos += n;
    let (culture_idx, _) = read_heap_idx(bytes, pos, ctx.str_wide)?;

    let name = read_string(bytes, strings, name_idx)?;
    if name.is_empty() {
        return Err(MalformedModule("assembly has an empty name"));
    }
    let culture = read_string(bytes, strings, culture_idx)?;
    let public_key = read_blob(bytes, blobs, public_key_idx)?;

    Ok(AssemblyIdentity {
        name,
        version: PackageVersion::with_revision(
            u64::from(major),
            u64::from(minor),
            u64::from(build),
            u64::from(revision),
        ),
        culture: if culture.is_empty() { None } else { Some(culture) },
        public_key_token: public_key_token(&public_key),
    })
}

fn read_heap_idx(bytes: &[u8], pos: usize, wide: bool) -> Result<(usize, usize)> {
    if wide {
        Ok((u32_at(bytes, pos)? as usize, 4))
    } else {
        Ok((u16_at(bytes, pos)? as usize, 2))
    }
}

fn read_string(bytes: &[u8], heap: usize, idx: usize) -> Result<String> {
    let mut end = heap + idx;
    while *slice_at(bytes, end, 1)?.first().unwrap_or(&0) != 0 {
        end += 1;
    }
    let raw = slice_at(bytes, heap + idx, end - (heap + idx))?;
    String::from_utf8(raw.to_vec()).map_err(|_| MalformedModule("non-UTF8 string heap entry"))
}

/// Read a blob heap entry, decoding the compressed length prefix.
fn read_blob(bytes: &[u8], heap: usize, idx: usize) -> Result<Vec<u8>> {
    let start = heap + idx;
    let first = *slice_at(bytes, start, 1)?.first().unwrap_or(&0);
    let (len, skip) = if first & 0x80 == 0 {
        (usize::from(first), 1)
    } else if first & 0xC0 == 0x80 {
        let second = *slice_at(bytes, start + 1, 1)?.first().unwrap_or(&0);
        ((usize::from(first & 0x3F) << 8) | usize::from(second), 2)
    } else if first & 0xE0 == 0xC0 {
        let rest = slice_at(bytes, start + 1, 3)?;
        (
            (usize::from(first & 0x1F) << 24)
                | (usize::from(rest[0]) << 16)
                | (usize::from(rest[1]) << 8)
                | usize::from(rest[2]),
            4,
        )
    } else {
        return Err(MalformedModule("invalid blob length prefix"));
    };
    Ok(slice_at(bytes, start + skip, len)?.to_vec())
}

/// Public key token: last 8 bytes of the SHA-1 of the key, reversed.
fn public_key_token(public_key: &[u8]) -> Option<[u8; 8]> {
    if public_key.is_empty() {
        return None;
    }
    let digest = Sha1::digest(public_key);
    let mut token = [0u8; 8];
    for (i, b) in digest[digest.len() - 8..].iter().rev().enumerate() {
        token[i] = *b;
    }
    Some(token)
}

struct SizeCtx {
    rows: [u32; 64],
    str_wide: bool,
    guid_wide: bool,
    blob_wide: bool,
}

/// Column kinds of a metadata table row.
#[derive(Clone, Copy)]
enum Col {
    Fixed(usize),
    Str,
    Guid,
    Blob,
    /// Simple index into one table.
    Idx(usize),
    /// Coded index over a table group with the given tag width.
    Coded(&'static [usize], u32),
}

impl Col {
    fn size(self, ctx: &SizeCtx) -> usize {
        let wide2 = |wide: bool| if wide { 4 } else { 2 };
        match self {
            Self::Fixed(n) => n,
            Self::Str => wide2(ctx.str_wide),
            Self::Guid => wide2(ctx.guid_wide),
            Self::Blob => wide2(ctx.blob_wide),
            Self::Idx(table) => wide2(ctx.rows[table] >= 0x1_0000),
            Self::Coded(tables, bits) => {
                let max = tables.iter().map(|&t| ctx.rows[t]).max().unwrap_or(0);
                wide2(max >= 1 << (16 - bits))
            }
        }
    }
}

const TYPE_DEF_OR_REF: Col = Col::Coded(&[0x02, 0x01, 0x1B], 2);
const HAS_CONSTANT: Col = Col::Coded(&[0x04, 0x08, 0x17], 2);
const HAS_FIELD_MARSHAL: Col = Col::Coded(&[0x04, 0x08], 1);
const HAS_DECL_SECURITY: Col = Col::Coded(&[0x02, 0x06, 0x20], 2);
const MEMBER_REF_PARENT: Col = Col::Coded(&[0x02, 0x01, 0x1A, 0x06, 0x1B], 3);
const HAS_SEMANTICS: Col = Col::Coded(&[0x14, 0x17], 1);
const METHOD_DEF_OR_REF: Col = Col::Coded(&[0x06, 0x0A], 1);
const MEMBER_FORWARDED: Col = Col::Coded(&[0x04, 0x06], 1);
const RESOLUTION_SCOPE: Col = Col::Coded(&[0x00, 0x1A, 0x23, 0x01], 2);
const CUSTOM_ATTRIBUTE_TYPE: Col = Col::Coded(&[0x06, 0x0A], 3);
const HAS_CUSTOM_ATTRIBUTE: Col = Col::Coded(
    &[
        0x06, 0x04, 0x01, 0x02, 0x08, 0x09, 0x0A, 0x00, 0x0E, 0x17, 0x14, 0x11, 0x1A, 0x1B,
        0x20, 0x23, 0x26, 0x27, 0x28, 0x2A, 0x2B, 0x2C,
    ],
    5,
);

/// Size in bytes of one row of the given metadata table, or `None` if the
/// table layout is unknown.
fn row_size(id: usize, ctx: &SizeCtx) -> Option<usize> {
    Some(table_cols(id)?.iter().map(|col| col.size(ctx)).sum())
}

/// Row layouts of every table that can precede the Assembly table.
fn table_cols(id: usize) -> Option<&'static [Col]> {
    use Col::{Blob, Fixed, Guid, Idx, Str};
    Some(match id {
        0x00 => &[Fixed(2), Str, Guid, Guid, Guid],
        0x01 => &[RESOLUTION_SCOPE, Str, Str],
        0x02 => &[Fixed(4), Str, Str, TYPE_DEF_OR_REF, Idx(0x04), Idx(0x06)],
        0x03 => &[Idx(0x04)],
        0x04 => &[Fixed(2), Str, Blob],
        0x05 => &[Idx(0x06)],
        0x06 => &[Fixed(4), Fixed(2), Fixed(2), Str, Blob, Idx(0x08)],
        0x07 => &[Idx(0x08)],
        0x08 => &[Fixed(2), Fixed(2), Str],
        0x09 => &[Idx(0x02), TYPE_DEF_OR_REF],
        0x0A => &[MEMBER_REF_PARENT, Str, Blob],
        0x0B => &[Fixed(2), HAS_CONSTANT, Blob],
        0x0C => &[HAS_CUSTOM_ATTRIBUTE, CUSTOM_ATTRIBUTE_TYPE, Blob],
        0x0D => &[HAS_FIELD_MARSHAL, Blob],
        0x0E => &[Fixed(2), HAS_DECL_SECURITY, Blob],
        0x0F => &[Fixed(2), Fixed(4), Idx(0x02)],
        0x10 => &[Fixed(4), Idx(0x04)],
        0x11 => &[Blob],
        0x12 => &[Idx(0x02), Idx(0x14)],
        0x13 => &[Idx(0x14)],
        0x14 => &[Fixed(2), Str, TYPE_DEF_OR_REF],
        0x15 => &[Idx(0x02), Idx(0x17)],
        0x16 => &[Idx(0x17)],
        0x17 => &[Fixed(2), Str, Blob],
        0x18 => &[Fixed(2), Idx(0x06), HAS_SEMANTICS],
        0x19 => &[Idx(0x02), METHOD_DEF_OR_REF, METHOD_DEF_OR_REF],
        0x1A => &[Str],
        0x1B => &[Blob],
        0x1C => &[Fixed(2), MEMBER_FORWARDED, Str, Idx(0x1A)],
        0x1D => &[Fixed(4), Idx(0x04)],
        0x1E => &[Fixed(4), Fixed(4)],
        0x1F => &[Fixed(4)],
        _ => return None,
    })
}
