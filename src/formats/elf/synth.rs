//! Synthetic ELF64 little-endian images for tests
//!
//! Self-contained so the integration tests can pull it in with `#[path]`.
//! Layout: file header, program headers, 8-aligned section contents,
//! `.shstrtab`, then the section header table (null, user sections,
//! `.shstrtab`), with `e_shstrndx` pointing at the last entry.

#![allow(dead_code)]

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: usize = 24;

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_DYNAMIC: u32 = 6;
const SHT_NOTE: u32 = 7;
const SHT_NOBITS: u32 = 8;
const SHT_DYNSYM: u32 = 11;
const SHF_ALLOC: u64 = 0x2;
const SHF_COMPRESSED: u64 = 0x800;

const STB_LOCAL: u8 = 0;
const STB_GLOBAL: u8 = 1;
const STT_NOTYPE: u8 = 0;
const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;

const DT_SONAME: i64 = 14;
const NT_GNU_BUILD_ID: u32 = 3;

struct SynthSegment {
    p_type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
}

struct SynthSection {
    name: String,
    sh_type: u32,
    flags: u64,
    addr: u64,
    link: u32,
    entsize: u64,
    data: Vec<u8>,
}

/// Builder for a synthetic ELF image
pub struct SynthElf {
    e_type: u16,
    segments: Vec<SynthSegment>,
    sections: Vec<SynthSection>,
    min_len: usize,
}

impl Default for SynthElf {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthElf {
    /// Empty `ET_DYN` image for x86-64
    pub fn new() -> Self {
        Self {
            e_type: 3,
            segments: Vec::new(),
            sections: Vec::new(),
            min_len: 0,
        }
    }

    pub fn file_type(mut self, e_type: u16) -> Self {
        self.e_type = e_type;
        self
    }

    pub fn segment(
        mut self,
        p_type: u32,
        flags: u32,
        offset: u64,
        vaddr: u64,
        filesz: u64,
        memsz: u64,
    ) -> Self {
        self.segments.push(SynthSegment {
            p_type,
            flags,
            offset,
            vaddr,
            filesz,
            memsz,
        });
        self
    }

    pub fn section(self, name: &str, sh_type: u32, flags: u64, addr: u64, data: Vec<u8>) -> Self {
        self.linked_section(name, sh_type, flags, addr, 0, 0, data)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn linked_section(
        mut self,
        name: &str,
        sh_type: u32,
        flags: u64,
        addr: u64,
        link: u32,
        entsize: u64,
        data: Vec<u8>,
    ) -> Self {
        self.sections.push(SynthSection {
            name: name.to_string(),
            sh_type,
            flags,
            addr,
            link,
            entsize,
            data,
        });
        self
    }

    /// Section header index the next added section will get
    fn next_index(&self) -> u32 {
        self.sections.len() as u32 + 1
    }

    /// A `SHF_COMPRESSED` section holding `plain` as a zlib stream
    pub fn compressed_section(self, name: &str, plain: &[u8]) -> Self {
        self.section(name, SHT_PROGBITS, SHF_COMPRESSED, 0, compress_section(plain))
    }

    /// `.symtab` + `.strtab`
    pub fn symtab(self, symbols: &[SynthSymbol]) -> Self {
        self.symbol_table(".symtab", ".strtab", SHT_SYMTAB, 0, symbols)
    }

    /// `.dynsym` + `.dynstr`
    pub fn dynsym(self, symbols: &[SynthSymbol]) -> Self {
        self.symbol_table(".dynsym", ".dynstr", SHT_DYNSYM, SHF_ALLOC, symbols)
    }

    fn symbol_table(
        self,
        name: &str,
        strtab_name: &str,
        sh_type: u32,
        flags: u64,
        symbols: &[SynthSymbol],
    ) -> Self {
        let (symtab, strtab) = symbol_tables(symbols);
        let link = self.next_index();
        self.section(strtab_name, SHT_STRTAB, flags, 0, strtab)
            .linked_section(name, sh_type, flags, 0, link, SYM_SIZE as u64, symtab)
    }

    /// `.note.gnu.build-id`
    pub fn build_id(self, id: &[u8]) -> Self {
        self.section(
            ".note.gnu.build-id",
            SHT_NOTE,
            SHF_ALLOC,
            0,
            note("GNU", NT_GNU_BUILD_ID, id),
        )
    }

    /// `.gnu_debuglink`
    pub fn debug_link(self, name: &str, crc: u32) -> Self {
        self.section(".gnu_debuglink", SHT_PROGBITS, 0, 0, debuglink_contents(name, crc))
    }

    /// `.dynamic` carrying `DT_SONAME`, with its own `.dynstr` when none exists yet
    pub fn soname(self, soname: &str) -> Self {
        let mut strings = vec![0u8];
        strings.extend_from_slice(soname.as_bytes());
        strings.push(0);
        let link = self.next_index();
        self.section(".dynstr", SHT_STRTAB, SHF_ALLOC, 0, strings)
            .linked_section(
                ".dynamic",
                SHT_DYNAMIC,
                SHF_ALLOC,
                0,
                link,
                16,
                dynamic_entries(&[(DT_SONAME, 1), (0, 0)]),
            )
    }

    /// Pad the image with zeros to at least `len` bytes
    pub fn min_len(mut self, len: usize) -> Self {
        self.min_len = len;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let phoff = EHDR_SIZE;
        let mut out = vec![0u8; phoff + self.segments.len() * PHDR_SIZE];

        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(section.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");

        let mut placed = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            pad8(&mut out);
            let offset = out.len() as u64;
            if section.sh_type != SHT_NOBITS {
                out.extend_from_slice(&section.data);
            }
            placed.push(offset);
        }
        pad8(&mut out);
        let shstrtab_offset = out.len() as u64;
        out.extend_from_slice(&shstrtab);

        pad8(&mut out);
        let shoff = out.len();
        let shnum = self.sections.len() + 2;

        // null section header
        out.extend_from_slice(&[0u8; SHDR_SIZE]);
        for ((section, offset), name) in self.sections.iter().zip(&placed).zip(&name_offsets) {
            let size = section.data.len() as u64;
            push_shdr(
                &mut out,
                *name,
                section.sh_type,
                section.flags,
                section.addr,
                *offset,
                size,
                section.link,
                section.entsize,
            );
        }
        push_shdr(
            &mut out,
            shstrtab_name,
            SHT_STRTAB,
            0,
            0,
            shstrtab_offset,
            shstrtab.len() as u64,
            0,
            0,
        );

        for (i, seg) in self.segments.iter().enumerate() {
            let at = phoff + i * PHDR_SIZE;
            put_u32(&mut out, at, seg.p_type);
            put_u32(&mut out, at + 4, seg.flags);
            put_u64(&mut out, at + 8, seg.offset);
            put_u64(&mut out, at + 16, seg.vaddr);
            put_u64(&mut out, at + 24, seg.vaddr);
            put_u64(&mut out, at + 32, seg.filesz);
            put_u64(&mut out, at + 40, seg.memsz);
            put_u64(&mut out, at + 48, 0x1000);
        }

        out[0..4].copy_from_slice(b"\x7fELF");
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1; // EV_CURRENT
        put_u16(&mut out, 16, self.e_type);
        put_u16(&mut out, 18, 62); // EM_X86_64
        put_u32(&mut out, 20, 1);
        put_u64(&mut out, 32, if self.segments.is_empty() { 0 } else { phoff as u64 });
        put_u64(&mut out, 40, shoff as u64);
        put_u16(&mut out, 52, EHDR_SIZE as u16);
        put_u16(&mut out, 54, PHDR_SIZE as u16);
        put_u16(&mut out, 56, self.segments.len() as u16);
        put_u16(&mut out, 58, SHDR_SIZE as u16);
        put_u16(&mut out, 60, shnum as u16);
        put_u16(&mut out, 62, (shnum - 1) as u16);

        if out.len() < self.min_len {
            out.resize(self.min_len, 0);
        }
        out
    }
}

/// A symbol table entry to encode
#[derive(Clone, Debug)]
pub struct SynthSymbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub info: u8,
    pub shndx: u16,
}

impl SynthSymbol {
    pub fn function(name: &str, value: u64, size: u64) -> Self {
        Self {
            name: name.to_string(),
            value,
            size,
            info: (STB_GLOBAL << 4) | STT_FUNC,
            shndx: 1,
        }
    }

    pub fn local_function(name: &str, value: u64, size: u64) -> Self {
        Self {
            info: (STB_LOCAL << 4) | STT_FUNC,
            ..Self::function(name, value, size)
        }
    }

    pub fn object(name: &str, value: u64, size: u64) -> Self {
        Self {
            info: (STB_GLOBAL << 4) | STT_OBJECT,
            ..Self::function(name, value, size)
        }
    }

    pub fn undefined(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: 0,
            size: 0,
            info: (STB_GLOBAL << 4) | STT_NOTYPE,
            shndx: 0,
        }
    }
}

/// Encode symbols as ELF64 `(symtab, strtab)` contents, with the leading null entry
pub fn symbol_tables(symbols: &[SynthSymbol]) -> (Vec<u8>, Vec<u8>) {
    let mut strtab = vec![0u8];
    let mut symtab = vec![0u8; SYM_SIZE];

    for sym in symbols {
        let name = strtab.len() as u32;
        strtab.extend_from_slice(sym.name.as_bytes());
        strtab.push(0);

        let at = symtab.len();
        symtab.resize(at + SYM_SIZE, 0);
        put_u32(&mut symtab, at, name);
        symtab[at + 4] = sym.info;
        symtab[at + 5] = 0;
        put_u16(&mut symtab, at + 6, sym.shndx);
        put_u64(&mut symtab, at + 8, sym.value);
        put_u64(&mut symtab, at + 16, sym.size);
    }

    (symtab, strtab)
}

/// Encode one note entry
pub fn note(name: &str, n_type: u32, desc: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let namesz = name.len() as u32 + 1;
    out.extend_from_slice(&namesz.to_le_bytes());
    out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    out.extend_from_slice(&n_type.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad4(&mut out);
    out.extend_from_slice(desc);
    pad4(&mut out);
    out
}

/// Encode ELF64 dynamic entries
pub fn dynamic_entries(entries: &[(i64, u64)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 16);
    for (tag, val) in entries {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&val.to_le_bytes());
    }
    out
}

/// Wrap `plain` in an ELF64 compression header and a zlib stream
pub fn compress_section(plain: &[u8]) -> Vec<u8> {
    use std::io::Write;

    let mut out = Vec::with_capacity(24 + plain.len());
    out.extend_from_slice(&1u32.to_le_bytes()); // ELFCOMPRESS_ZLIB
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(plain.len() as u64).to_le_bytes());
    out.extend_from_slice(&1u64.to_le_bytes());

    let mut encoder = flate2::write::ZlibEncoder::new(out, flate2::Compression::default());
    encoder.write_all(plain).expect("in-memory write");
    encoder.finish().expect("in-memory write")
}

/// DWARF 4 `(.debug_abbrev, .debug_info, .debug_line)` for one unit
///
/// `/src/main.c` has rows at 0x1000 (line 10) and 0x1010 (line 20) ending at
/// 0x1020, and `main` spans 0x1000..0x1020, declared at line 9.
pub fn dwarf_sections() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let abbrev = vec![
        1, 0x11, 1, // compile_unit, has children
        0x03, 0x08, // name: string
        0x10, 0x17, // stmt_list: sec_offset
        0, 0,
        2, 0x2e, 0, // subprogram, no children
        0x03, 0x08, // name: string
        0x11, 0x01, // low_pc: addr
        0x12, 0x06, // high_pc: data4
        0x3a, 0x0b, // decl_file: data1
        0x3b, 0x0b, // decl_line: data1
        0, 0,
        0,
    ];

    let mut unit = Vec::new();
    unit.extend_from_slice(&4u16.to_le_bytes());
    unit.extend_from_slice(&0u32.to_le_bytes());
    unit.push(8);
    unit.push(1);
    unit.extend_from_slice(b"main.c\0");
    unit.extend_from_slice(&0u32.to_le_bytes());
    unit.push(2);
    unit.extend_from_slice(b"main\0");
    unit.extend_from_slice(&0x1000u64.to_le_bytes());
    unit.extend_from_slice(&0x20u32.to_le_bytes());
    unit.push(1);
    unit.push(9);
    unit.push(0);
    let mut info = (unit.len() as u32).to_le_bytes().to_vec();
    info.extend_from_slice(&unit);

    let mut header = vec![1, 1, 1, (-5i8) as u8, 14, 13];
    header.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    header.extend_from_slice(b"/src\0\0");
    header.extend_from_slice(b"main.c\0");
    header.extend_from_slice(&[1, 0, 0, 0]);

    let mut program = vec![0, 9, 2];
    program.extend_from_slice(&0x1000u64.to_le_bytes());
    program.extend_from_slice(&[
        3, 9, 1, // line 10, copy
        2, 0x10, 3, 10, 1, // +0x10, line 20, copy
        2, 0x10, 0, 1, 1, // +0x10, end_sequence
    ]);

    let mut body = 4u16.to_le_bytes().to_vec();
    body.extend_from_slice(&(header.len() as u32).to_le_bytes());
    body.extend_from_slice(&header);
    body.extend_from_slice(&program);
    let mut line = (body.len() as u32).to_le_bytes().to_vec();
    line.extend_from_slice(&body);

    (abbrev, info, line)
}

/// Encode `.gnu_debuglink` contents
pub fn debuglink_contents(name: &str, crc: u32) -> Vec<u8> {
    let mut out = name.as_bytes().to_vec();
    out.push(0);
    pad4(&mut out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

#[allow(clippy::too_many_arguments)]
fn push_shdr(
    out: &mut Vec<u8>,
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
) {
    let at = out.len();
    out.resize(at + SHDR_SIZE, 0);
    put_u32(out, at, name);
    put_u32(out, at + 4, sh_type);
    put_u64(out, at + 8, flags);
    put_u64(out, at + 16, addr);
    put_u64(out, at + 24, offset);
    put_u64(out, at + 32, size);
    put_u32(out, at + 40, link);
    put_u64(out, at + 48, 1);
    put_u64(out, at + 56, entsize);
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn pad8(out: &mut Vec<u8>) {
    while out.len() % 8 != 0 {
        out.push(0);
    }
}

fn put_u16(out: &mut [u8], at: usize, v: u16) {
    out[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut [u8], at: usize, v: u32) {
    out[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut [u8], at: usize, v: u64) {
    out[at..at + 8].copy_from_slice(&v.to_le_bytes());
}
