#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Format {
    #[default]
    Unknown,

    R8UInt,
    R8SInt,
    R8UNorm,
    R8SNorm,
    RG8UInt,
    RG8SInt,
    RG8UNorm,
    RG8SNorm,
    R16UInt,
    R16SInt,
    R16UNorm,
    R16SNorm,
    R16Float,
    BGRA4UNorm,
    B5G6R5UNorm,
    B5G5R5A1UNorm,
    RGBA8UInt,
    RGBA8SInt,
    RGBA8UNorm,
    RGBA8SNorm,
    BGRA8UNorm,
    SRGBA8UNorm,
    SBGRA8UNorm,
    R10G10B10A2UNorm,
    R11G11B10Float,
    RG16UInt,
    RG16SInt,
    RG16UNorm,
    RG16SNorm,
    RG16Float,
    R32UInt,
    R32SInt,
    R32Float,
    RGBA16UInt,
    RGBA16SInt,
    RGBA16Float,
    RGBA16UNorm,
    RGBA16SNorm,
    RG32UInt,
    RG32SInt,
    RG32Float,
    RGB32UInt,
    RGB32SInt,
    RGB32Float,
    RGBA32UInt,
    RGBA32SInt,
    RGBA32Float,

    D16,
    D24S8,
    X24G8UInt,
    D32,
    D32S8,
    X32G8UInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Integer,
    Float,
    Normalized,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub format: Format,
    pub name: &'static str,
    pub byte_size: u8,
    pub kind: FormatKind,
    pub has_red: bool,
    pub has_green: bool,
    pub has_blue: bool,
    pub has_alpha: bool,
    pub has_depth: bool,
    pub has_stencil: bool,
    pub is_signed: bool,
    pub is_srgb: bool,
}

macro_rules! format_row {
    ($format: ident, $size: expr, $kind: ident, $r: expr, $g: expr, $b: expr, $a: expr, $d: expr, $s: expr, $signed: expr, $srgb: expr) => {
        FormatInfo {
            format: Format::$format,
            name: stringify!($format),
            byte_size: $size,
            kind: FormatKind::$kind,
            has_red: $r,
            has_green: $g,
            has_blue: $b,
            has_alpha: $a,
            has_depth: $d,
            has_stencil: $s,
            is_signed: $signed,
            is_srgb: $srgb,
        }
    };
}

// Rows must stay in the exact declaration order of the Format enum.
const FORMAT_INFOS: &[FormatInfo] = &[
    format_row!(Unknown,          0,  Integer,      false, false, false, false, false, false, false, false),
    format_row!(R8UInt,           1,  Integer,      true,  false, false, false, false, false, false, false),
    format_row!(R8SInt,           1,  Integer,      true,  false, false, false, false, false, true,  false),
    format_row!(R8UNorm,          1,  Normalized,   true,  false, false, false, false, false, false, false),
    format_row!(R8SNorm,          1,  Normalized,   true,  false, false, false, false, false, true,  false),
    format_row!(RG8UInt,          2,  Integer,      true,  true,  false, false, false, false, false, false),
    format_row!(RG8SInt,          2,  Integer,      true,  true,  false, false, false, false, true,  false),
    format_row!(RG8UNorm,         2,  Normalized,   true,  true,  false, false, false, false, false, false),
    format_row!(RG8SNorm,         2,  Normalized,   true,  true,  false, false, false, false, true,  false),
    format_row!(R16UInt,          2,  Integer,      true,  false, false, false, false, false, false, false),
    format_row!(R16SInt,          2,  Integer,      true,  false, false, false, false, false, true,  false),
    format_row!(R16UNorm,         2,  Normalized,   true,  false, false, false, false, false, false, false),
    format_row!(R16SNorm,         2,  Normalized,   true,  false, false, false, false, false, true,  false),
    format_row!(R16Float,         2,  Float,        true,  false, false, false, false, false, true,  false),
    format_row!(BGRA4UNorm,       2,  Normalized,   true,  true,  true,  true,  false, false, false, false),
    format_row!(B5G6R5UNorm,      2,  Normalized,   true,  true,  true,  false, false, false, false, false),
    format_row!(B5G5R5A1UNorm,    2,  Normalized,   true,  true,  true,  true,  false, false, false, false),
    format_row!(RGBA8UInt,        4,  Integer,      true,  true,  true,  true,  false, false, false, false),
    format_row!(RGBA8SInt,        4,  Integer,      true,  true,  true,  true,  false, false, true,  false),
    format_row!(RGBA8UNorm,       4,  Normalized,   true,  true,  true,  true,  false, false, false, false),
    format_row!(RGBA8SNorm,       4,  Normalized,   true,  true,  true,  true,  false, false, true,  false),
    format_row!(BGRA8UNorm,       4,  Normalized,   true,  true,  true,  true,  false, false, false, false),
    format_row!(SRGBA8UNorm,      4,  Normalized,   true,  true,  true,  true,  false, false, false, true),
    format_row!(SBGRA8UNorm,      4,  Normalized,   true,  true,  true,  true,  false, false, false, true),
    format_row!(R10G10B10A2UNorm, 4,  Normalized,   true,  true,  true,  true,  false, false, false, false),
    format_row!(R11G11B10Float,   4,  Float,        true,  true,  true,  false, false, false, false, false),
    format_row!(RG16UInt,         4,  Integer,      true,  true,  false, false, false, false, false, false),
    format_row!(RG16SInt,         4,  Integer,      true,  true,  false, false, false, false, true,  false),
    format_row!(RG16UNorm,        4,  Normalized,   true,  true,  false, false, false, false, false, false),
    format_row!(RG16SNorm,        4,  Normalized,   true,  true,  false, false, false, false, true,  false),
    format_row!(RG16Float,        4,  Float,        true,  true,  false, false, false, false, true,  false),
    format_row!(R32UInt,          4,  Integer,      true,  false, false, false, false, false, false, false),
    format_row!(R32SInt,          4,  Integer,      true,  false, false, false, false, false, true,  false),
    format_row!(R32Float,         4,  Float,        true,  false, false, false, false, false, true,  false),
    format_row!(RGBA16UInt,       8,  Integer,      true,  true,  true,  true,  false, false, false, false),
    format_row!(RGBA16SInt,       8,  Integer,      true,  true,  true,  true,  false, false, true,  false),
    format_row!(RGBA16Float,      8,  Float,        true,  true,  true,  true,  false, false, true,  false),
    format_row!(RGBA16UNorm,      8,  Normalized,   true,  true,  true,  true,  false, false, false, false),
    format_row!(RGBA16SNorm,      8,  Normalized,   true,  true,  true,  true,  false, false, true,  false),
    format_row!(RG32UInt,         8,  Integer,      true,  true,  false, false, false, false, false, false),
    format_row!(RG32SInt,         8,  Integer,      true,  true,  false, false, false, false, true,  false),
    format_row!(RG32Float,        8,  Float,        true,  true,  false, false, false, false, true,  false),
    format_row!(RGB32UInt,        12, Integer,      true,  true,  true,  false, false, false, false, false),
    format_row!(RGB32SInt,        12, Integer,      true,  true,  true,  false, false, false, true,  false),
    format_row!(RGB32Float,       12, Float,        true,  true,  true,  false, false, false, true,  false),
    format_row!(RGBA32UInt,       16, Integer,      true,  true,  true,  true,  false, false, false, false),
    format_row!(RGBA32SInt,       16, Integer,      true,  true,  true,  true,  false, false, true,  false),
    format_row!(RGBA32Float,      16, Float,        true,  true,  true,  true,  false, false, true,  false),
    format_row!(D16,              2,  DepthStencil, false, false, false, false, true,  false, false, false),
    format_row!(D24S8,            4,  DepthStencil, false, false, false, false, true,  true,  false, false),
    format_row!(X24G8UInt,        4,  Integer,      false, false, false, false, false, true,  false, false),
    format_row!(D32,              4,  DepthStencil, false, false, false, false, true,  false, false, false),
    format_row!(D32S8,            8,  DepthStencil, false, false, false, false, true,  true,  false, false),
    format_row!(X32G8UInt,        8,  Integer,      false, false, false, false, false, true,  false, false),
];

pub fn format_info(format: Format) -> &'static FormatInfo {
    let index = format as usize;
    debug_assert!(index < FORMAT_INFOS.len());
    &FORMAT_INFOS[index]
}

impl Format {
    pub fn is_depth_stencil(&self) -> bool {
        let info = format_info(*self);
        info.has_depth || info.has_stencil
    }

    pub fn byte_size(&self) -> u64 {
        format_info(*self).byte_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rows_match_enum_order() {
        for (index, info) in FORMAT_INFOS.iter().enumerate() {
            assert_eq!(info.format as usize, index, "row {} out of order", index);
            assert_eq!(format_info(info.format).format, info.format);
        }
    }

    #[test]
    fn channel_bits_are_consistent_with_kind() {
        for info in FORMAT_INFOS {
            if info.kind == FormatKind::DepthStencil {
                assert!(info.has_depth || info.has_stencil, "{}", info.name);
                assert!(!info.has_red && !info.has_green && !info.has_blue && !info.has_alpha);
            }
            if info.has_depth {
                assert_eq!(info.kind, FormatKind::DepthStencil, "{}", info.name);
            }
            if info.is_srgb {
                assert_eq!(info.kind, FormatKind::Normalized, "{}", info.name);
            }
            if info.format != Format::Unknown {
                assert!(info.byte_size > 0, "{}", info.name);
            }
        }
    }

    #[test]
    fn depth_formats_report_depth() {
        assert!(Format::D32.is_depth_stencil());
        assert!(Format::D24S8.is_depth_stencil());
        assert!(Format::X24G8UInt.is_depth_stencil());
        assert!(!Format::RGBA8UNorm.is_depth_stencil());
    }
}
