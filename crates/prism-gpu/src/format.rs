//! Format registry.
//!
//! Maps every format the controller accepts to its texel size and aspect
//! makeup, and maps reflected vertex input types to attribute formats.

use ash::vk;
use prism_spirv::{InputVariable, NumericKind};

use crate::error::{GpuError, Result};

/// Static properties of a supported format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    /// Bytes per texel.
    pub texel_size: u32,
    /// Full aspect mask for views and barriers.
    pub aspect: vk::ImageAspectFlags,
    pub has_depth: bool,
    pub has_stencil: bool,
}

impl FormatInfo {
    const fn color(texel_size: u32) -> Self {
        Self {
            texel_size,
            aspect: vk::ImageAspectFlags::COLOR,
            has_depth: false,
            has_stencil: false,
        }
    }
}

/// Look up a format in the registry.
pub fn format_info(format: vk::Format) -> Result<FormatInfo> {
    let info = match format {
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM => FormatInfo::color(4),

        vk::Format::R16G16B16A16_UNORM | vk::Format::R16G16B16A16_SFLOAT => FormatInfo::color(8),

        vk::Format::R32_UINT | vk::Format::R32_SINT | vk::Format::R32_SFLOAT => {
            FormatInfo::color(4)
        }
        vk::Format::R32G32_UINT | vk::Format::R32G32_SINT | vk::Format::R32G32_SFLOAT => {
            FormatInfo::color(8)
        }
        vk::Format::R32G32B32_UINT
        | vk::Format::R32G32B32_SINT
        | vk::Format::R32G32B32_SFLOAT => FormatInfo::color(12),
        vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_SFLOAT => FormatInfo::color(16),

        vk::Format::D24_UNORM_S8_UINT => FormatInfo {
            texel_size: 4,
            aspect: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            has_depth: true,
            has_stencil: true,
        },
        vk::Format::D32_SFLOAT => FormatInfo {
            texel_size: 4,
            aspect: vk::ImageAspectFlags::DEPTH,
            has_depth: true,
            has_stencil: false,
        },
        vk::Format::D32_SFLOAT_S8_UINT => FormatInfo {
            texel_size: 8,
            aspect: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            has_depth: true,
            has_stencil: true,
        },

        other => return Err(GpuError::UnsupportedFormat(other)),
    };
    Ok(info)
}

/// Attribute format and byte size for a reflected vertex input.
pub fn vertex_attribute_format(input: &InputVariable) -> Result<(vk::Format, u32)> {
    if input.width != 32 {
        return Err(GpuError::ShaderReflect(format!(
            "unsupported {}-bit vertex input at location {}",
            input.width, input.location
        )));
    }
    let format = match (input.kind, input.components) {
        (NumericKind::Float, 1) => vk::Format::R32_SFLOAT,
        (NumericKind::Float, 2) => vk::Format::R32G32_SFLOAT,
        (NumericKind::Float, 3) => vk::Format::R32G32B32_SFLOAT,
        (NumericKind::Float, 4) => vk::Format::R32G32B32A32_SFLOAT,
        (NumericKind::Int, 1) => vk::Format::R32_SINT,
        (NumericKind::Int, 2) => vk::Format::R32G32_SINT,
        (NumericKind::Int, 3) => vk::Format::R32G32B32_SINT,
        (NumericKind::Int, 4) => vk::Format::R32G32B32A32_SINT,
        (NumericKind::Uint, 1) => vk::Format::R32_UINT,
        (NumericKind::Uint, 2) => vk::Format::R32G32_UINT,
        (NumericKind::Uint, 3) => vk::Format::R32G32B32_UINT,
        (NumericKind::Uint, 4) => vk::Format::R32G32B32A32_UINT,
        (kind, components) => {
            return Err(GpuError::ShaderReflect(format!(
                "unsupported vertex input {kind:?}x{components} at location {}",
                input.location
            )))
        }
    };
    Ok((format, input.components * 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_required_formats() {
        for format in [
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::R8G8B8A8_SNORM,
            vk::Format::R8G8B8A8_SRGB,
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::R16G16B16A16_UNORM,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::R32G32B32A32_SFLOAT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
        ] {
            assert!(format_info(format).is_ok(), "{format:?} missing");
        }
        assert!(format_info(vk::Format::BC7_UNORM_BLOCK).is_err());
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(format_info(vk::Format::R8G8B8A8_SRGB).unwrap().texel_size, 4);
        assert_eq!(
            format_info(vk::Format::R32G32B32A32_SFLOAT).unwrap().texel_size,
            16
        );
        assert_eq!(format_info(vk::Format::R32G32B32_SFLOAT).unwrap().texel_size, 12);
    }

    #[test]
    fn depth_stencil_aspects() {
        let d24s8 = format_info(vk::Format::D24_UNORM_S8_UINT).unwrap();
        assert!(d24s8.has_depth && d24s8.has_stencil);
        assert_eq!(
            d24s8.aspect,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );

        let d32 = format_info(vk::Format::D32_SFLOAT).unwrap();
        assert!(d32.has_depth && !d32.has_stencil);
        assert_eq!(d32.aspect, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn vertex_formats_from_reflection() {
        let vec3 = InputVariable {
            location: 0,
            kind: NumericKind::Float,
            width: 32,
            components: 3,
        };
        assert_eq!(
            vertex_attribute_format(&vec3).unwrap(),
            (vk::Format::R32G32B32_SFLOAT, 12)
        );

        let uint = InputVariable {
            location: 1,
            kind: NumericKind::Uint,
            width: 32,
            components: 1,
        };
        assert_eq!(
            vertex_attribute_format(&uint).unwrap(),
            (vk::Format::R32_UINT, 4)
        );
    }
}
