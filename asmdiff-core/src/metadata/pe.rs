//! Locate the metadata root inside a PE/COFF image.

use goblin::pe::section_table::SectionTable;
use goblin::pe::PE;

use crate::error::MetadataError;

/// Offsets inside the CLI header (`IMAGE_COR20_HEADER`).
const COR20_METADATA_RVA: usize = 8;
const COR20_METADATA_SIZE: usize = 12;

/// Return the slice holding the metadata root of a managed PE image.
pub(crate) fn metadata_root(bytes: &[u8]) -> Result<&[u8], MetadataError> {
    let pe = PE::parse(bytes).map_err(|e| MetadataError::InvalidImage {
        message: e.to_string(),
    })?;
    let Some(optional) = pe.header.optional_header.as_ref() else {
        return Err(MetadataError::NotManaged);
    };

    let (cli_rva, cli_size) = match optional.data_directories.get_clr_runtime_header() {
        Some(dir) if dir.virtual_address != 0 && dir.size != 0 => (dir.virtual_address, dir.size),
        _ => return Err(MetadataError::NotManaged),
    };

    let cli_offset = rva_to_offset(&pe.sections, cli_rva).ok_or(MetadataError::InvalidImage {
        message: format!("CLI header RVA {cli_rva:#x} is outside every section"),
    })?;
    let cli = slice(bytes, cli_offset, cli_size as usize, "CLI header")?;
    let metadata_rva = read_u32(cli, COR20_METADATA_RVA)?;
    let metadata_size = read_u32(cli, COR20_METADATA_SIZE)?;

    let metadata_offset =
        rva_to_offset(&pe.sections, metadata_rva).ok_or(MetadataError::InvalidImage {
            message: format!("metadata RVA {metadata_rva:#x} is outside every section"),
        })?;
    slice(bytes, metadata_offset, metadata_size as usize, "metadata root")
}

fn rva_to_offset(sections: &[SectionTable], rva: u32) -> Option<usize> {
    sections.iter().find_map(|section| {
        let start = section.virtual_address;
        let span = section.virtual_size.max(section.size_of_raw_data);
        if rva >= start && rva < start.saturating_add(span) {
            (rva - start)
                .checked_add(section.pointer_to_raw_data)
                .map(|offset| offset as usize)
        } else {
            None
        }
    })
}

fn slice<'a>(
    bytes: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], MetadataError> {
    bytes
        .get(offset..offset.saturating_add(len))
        .ok_or(MetadataError::Truncated { what, offset })
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, MetadataError> {
    let raw = slice(bytes, offset, 4, "CLI header")?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
