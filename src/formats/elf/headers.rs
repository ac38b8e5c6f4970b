//! ELF header parsing

use crate::formats::elf::types::*;
use crate::formats::elf::utils::EndianRead;

/// Parse ELF identification bytes
pub fn parse_ident(data: &[u8]) -> Result<ElfIdent> {
    if data.len() < EI_NIDENT {
        // Report a bad magic before a short read when the prefix already disagrees.
        let n = data.len().min(ELF_MAGIC.len());
        if data[..n] != ELF_MAGIC[..n] {
            return Err(ElfError::InvalidMagic);
        }
        return Err(ElfError::Truncated {
            offset: 0,
            needed: EI_NIDENT,
        });
    }

    if &data[0..4] != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }

    let class = ElfClass::from_u8(data[4])?;
    let data_encoding = ElfData::from_u8(data[5])?;

    Ok(ElfIdent {
        class,
        data: data_encoding,
        version: data[6],
        osabi: data[7],
    })
}

/// Parse ELF header
pub fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    let ident = parse_ident(data)?;

    let header_size = ident.class.header_size();
    if data.len() < header_size {
        return Err(ElfError::Truncated {
            offset: 0,
            needed: header_size,
        });
    }

    let endian = ident.data;

    let e_type = data.read_u16(16, endian)?;
    let e_machine = data.read_u16(18, endian)?;
    let e_version = data.read_u32(20, endian)?;

    let header = match ident.class {
        ElfClass::Elf32 => ElfHeader {
            ident,
            e_type,
            e_machine,
            e_version,
            e_entry: u64::from(data.read_u32(24, endian)?),
            e_phoff: u64::from(data.read_u32(28, endian)?),
            e_shoff: u64::from(data.read_u32(32, endian)?),
            e_flags: data.read_u32(36, endian)?,
            e_ehsize: data.read_u16(40, endian)?,
            e_phentsize: data.read_u16(42, endian)?,
            e_phnum: data.read_u16(44, endian)?,
            e_shentsize: data.read_u16(46, endian)?,
            e_shnum: data.read_u16(48, endian)?,
            e_shstrndx: data.read_u16(50, endian)?,
        },
        ElfClass::Elf64 => ElfHeader {
            ident,
            e_type,
            e_machine,
            e_version,
            e_entry: data.read_u64(24, endian)?,
            e_phoff: data.read_u64(32, endian)?,
            e_shoff: data.read_u64(40, endian)?,
            e_flags: data.read_u32(48, endian)?,
            e_ehsize: data.read_u16(52, endian)?,
            e_phentsize: data.read_u16(54, endian)?,
            e_phnum: data.read_u16(56, endian)?,
            e_shentsize: data.read_u16(58, endian)?,
            e_shnum: data.read_u16(60, endian)?,
            e_shstrndx: data.read_u16(62, endian)?,
        },
    };

    // Validate header
    if header.e_ehsize as usize != header_size {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_ehsize: expected {}, got {}",
            header_size, header.e_ehsize
        )));
    }

    let expected_phentsize = ident.class.program_header_size();
    if header.e_phnum > 0 && header.e_phentsize as usize != expected_phentsize {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_phentsize: expected {}, got {}",
            expected_phentsize, header.e_phentsize
        )));
    }

    let expected_shentsize = ident.class.section_header_size();
    if header.e_shnum > 0 && header.e_shentsize as usize != expected_shentsize {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_shentsize: expected {}, got {}",
            expected_shentsize, header.e_shentsize
        )));
    }

    Ok(header)
}
