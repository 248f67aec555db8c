//! Shader programs.
//!
//! A shader is created from raw SPIR-V blobs, one per stage. Everything
//! else is reflected: stage kind and entry point, vertex inputs, descriptor
//! bindings and push constants. Bindings from different stages are merged;
//! two stages disagreeing on what lives at a (set, binding) pair is an
//! error, not a best effort.

use std::ffi::CString;

use ash::vk;
use prism_spirv::{DescriptorKind, ExecutionModel, InputVariable, StageReflection};

use crate::error::{GpuError, Result};
use crate::format::vertex_attribute_format;

/// One compiled stage of a shader.
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: CString,
}

/// A descriptor binding after merging across stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// A reflected, linked shader program.
pub struct Shader {
    pub stages: Vec<ShaderStage>,
    /// Bindings per set index; sets with no bindings are empty vectors.
    pub sets: Vec<Vec<MergedBinding>>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub pipeline_layout: vk::PipelineLayout,
    /// One range per stage that declares a push-constant block.
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Stride of the single interleaved vertex binding.
    pub vertex_stride: u32,
}

/// Stage flags for a module linked into a graphics program. A compute
/// module has no place in one and is rejected outright.
pub(crate) fn graphics_stage_flags(model: ExecutionModel) -> Result<vk::ShaderStageFlags> {
    match model {
        ExecutionModel::Vertex => Ok(vk::ShaderStageFlags::VERTEX),
        ExecutionModel::TessellationControl => Ok(vk::ShaderStageFlags::TESSELLATION_CONTROL),
        ExecutionModel::TessellationEvaluation => Ok(vk::ShaderStageFlags::TESSELLATION_EVALUATION),
        ExecutionModel::Geometry => Ok(vk::ShaderStageFlags::GEOMETRY),
        ExecutionModel::Fragment => Ok(vk::ShaderStageFlags::FRAGMENT),
        ExecutionModel::Compute => Err(GpuError::ShaderReflect(
            "compute module in a graphics shader".into(),
        )),
    }
}

pub(crate) fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
    }
}

/// Merge per-stage bindings into per-set lists.
///
/// Within a set the result is sorted by binding index. Stages that share a
/// (set, binding) pair must agree on kind and count; their stage flags are
/// combined.
pub(crate) fn merge_bindings(
    stages: &[(vk::ShaderStageFlags, &StageReflection)],
) -> Result<Vec<Vec<MergedBinding>>> {
    let mut sets: Vec<Vec<MergedBinding>> = Vec::new();

    for (flags, reflection) in stages {
        for binding in &reflection.bindings {
            let set = binding.set as usize;
            if sets.len() <= set {
                sets.resize_with(set + 1, Vec::new);
            }
            let entries = &mut sets[set];
            if let Some(existing) = entries.iter_mut().find(|e| e.binding == binding.binding) {
                if existing.kind != binding.kind || existing.count != binding.count {
                    return Err(GpuError::ShaderMismatch(format!(
                        "set {} binding {} disagrees between stages: {:?} x{} vs {:?} x{}",
                        binding.set,
                        binding.binding,
                        existing.kind,
                        existing.count,
                        binding.kind,
                        binding.count,
                    )));
                }
                existing.stages |= *flags;
            } else {
                entries.push(MergedBinding {
                    binding: binding.binding,
                    kind: binding.kind,
                    count: binding.count,
                    stages: *flags,
                });
            }
        }
    }

    for entries in &mut sets {
        entries.sort_by_key(|e| e.binding);
    }
    Ok(sets)
}

/// Collect push constant ranges across stages.
///
/// At most one block per stage; each becomes its own range at offset
/// zero, flagged with only that stage, sized to that stage's block.
pub(crate) fn merge_push_constants(
    stages: &[(vk::ShaderStageFlags, &StageReflection)],
) -> Vec<vk::PushConstantRange> {
    let mut ranges = Vec::new();
    for (flags, reflection) in stages {
        if let Some(block) = &reflection.push_constant {
            ranges.push(
                vk::PushConstantRange::default()
                    .stage_flags(*flags)
                    .offset(0)
                    .size(block.size),
            );
        }
    }
    ranges
}

/// Derive the single interleaved vertex binding from the vertex stage's
/// inputs: attributes sorted by location, tightly packed in that order.
pub(crate) fn derive_vertex_input(
    inputs: &[InputVariable],
) -> Result<(Vec<vk::VertexInputAttributeDescription>, u32)> {
    let mut sorted: Vec<&InputVariable> = inputs.iter().collect();
    sorted.sort_by_key(|input| input.location);

    let mut attributes = Vec::with_capacity(sorted.len());
    let mut offset = 0u32;
    for input in sorted {
        let (format, size) = vertex_attribute_format(input)?;
        attributes.push(
            vk::VertexInputAttributeDescription::default()
                .location(input.location)
                .binding(0)
                .format(format)
                .offset(offset),
        );
        offset += size;
    }
    Ok((attributes, offset))
}

/// Reflect, compile and link a shader from per-stage SPIR-V blobs.
///
/// # Safety
///
/// `device` must be a valid device; the returned modules and layouts must
/// be destroyed before the device.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub(crate) unsafe fn create_shader(device: &ash::Device, sources: &[&[u8]]) -> Result<Shader> {
    let mut reflections = Vec::with_capacity(sources.len());
    for bytes in sources {
        let reflection = StageReflection::parse_bytes(bytes)
            .map_err(|err| GpuError::ShaderReflect(err.to_string()))?;
        let flags = graphics_stage_flags(reflection.execution_model)?;
        if reflections
            .iter()
            .any(|(existing, _)| *existing == flags)
        {
            return Err(GpuError::ShaderMismatch(format!(
                "duplicate {flags:?} stage"
            )));
        }
        reflections.push((flags, reflection));
    }

    let stage_refs: Vec<(vk::ShaderStageFlags, &StageReflection)> = reflections
        .iter()
        .map(|(flags, reflection)| (*flags, reflection))
        .collect();

    let vertex = stage_refs
        .iter()
        .find(|(flags, _)| *flags == vk::ShaderStageFlags::VERTEX)
        .ok_or_else(|| GpuError::ShaderMismatch("no vertex stage".into()))?;
    let (vertex_attributes, vertex_stride) = derive_vertex_input(&vertex.1.inputs)?;

    let sets = merge_bindings(&stage_refs)?;
    let push_constant_ranges = merge_push_constants(&stage_refs);

    // Set layouts are dense: a gap set still gets an empty layout so the
    // pipeline layout's set indices line up with the reflected ones.
    let mut set_layouts = Vec::with_capacity(sets.len());
    for entries in &sets {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(descriptor_type(entry.kind))
                    .descriptor_count(entry.count)
                    .stage_flags(entry.stages)
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        set_layouts.push(unsafe { device.create_descriptor_set_layout(&create_info, None)? });
    }

    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);
    let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

    let mut stages = Vec::with_capacity(reflections.len());
    for ((flags, reflection), bytes) in reflections.iter().zip(sources) {
        let words = prism_spirv::words_from_bytes(bytes)
            .map_err(|err| GpuError::ShaderReflect(err.to_string()))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { device.create_shader_module(&create_info, None)? };
        let entry_point = CString::new(reflection.entry_point.as_str())
            .map_err(|_| GpuError::ShaderReflect("entry point contains NUL".into()))?;
        stages.push(ShaderStage {
            stage: *flags,
            module,
            entry_point,
        });
    }

    Ok(Shader {
        stages,
        sets,
        set_layouts,
        pipeline_layout,
        push_constant_ranges,
        vertex_attributes,
        vertex_stride,
    })
}

/// Destroy every Vulkan object a shader owns.
///
/// # Safety
///
/// Nothing may still reference the modules or layouts.
pub(crate) unsafe fn destroy_shader(device: &ash::Device, shader: &Shader) {
    unsafe {
        for stage in &shader.stages {
            device.destroy_shader_module(stage.module, None);
        }
        for layout in &shader.set_layouts {
            device.destroy_descriptor_set_layout(*layout, None);
        }
        device.destroy_pipeline_layout(shader.pipeline_layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_spirv::{DescriptorBinding, NumericKind, PushConstantBlock};

    fn reflection(
        bindings: Vec<DescriptorBinding>,
        push_constant: Option<PushConstantBlock>,
    ) -> StageReflection {
        StageReflection {
            execution_model: ExecutionModel::Vertex,
            entry_point: "main".into(),
            inputs: Vec::new(),
            bindings,
            push_constant,
        }
    }

    #[test]
    fn shared_binding_merges_stage_flags() {
        let vertex = reflection(
            vec![DescriptorBinding {
                set: 0,
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                count: 1,
            }],
            None,
        );
        let fragment = reflection(
            vec![DescriptorBinding {
                set: 0,
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                count: 1,
            }],
            None,
        );

        let sets = merge_bindings(&[
            (vk::ShaderStageFlags::VERTEX, &vertex),
            (vk::ShaderStageFlags::FRAGMENT, &fragment),
        ])
        .unwrap();

        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].len(), 1);
        assert_eq!(
            sets[0][0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn conflicting_binding_kind_is_rejected() {
        let vertex = reflection(
            vec![DescriptorBinding {
                set: 1,
                binding: 2,
                kind: DescriptorKind::UniformBuffer,
                count: 1,
            }],
            None,
        );
        let fragment = reflection(
            vec![DescriptorBinding {
                set: 1,
                binding: 2,
                kind: DescriptorKind::CombinedImageSampler,
                count: 1,
            }],
            None,
        );

        let result = merge_bindings(&[
            (vk::ShaderStageFlags::VERTEX, &vertex),
            (vk::ShaderStageFlags::FRAGMENT, &fragment),
        ]);
        assert!(matches!(result, Err(GpuError::ShaderMismatch(_))));
    }

    #[test]
    fn gap_sets_stay_dense() {
        let fragment = reflection(
            vec![DescriptorBinding {
                set: 2,
                binding: 0,
                kind: DescriptorKind::CombinedImageSampler,
                count: 1,
            }],
            None,
        );
        let sets =
            merge_bindings(&[(vk::ShaderStageFlags::FRAGMENT, &fragment)]).unwrap();
        assert_eq!(sets.len(), 3);
        assert!(sets[0].is_empty());
        assert!(sets[1].is_empty());
        assert_eq!(sets[2].len(), 1);
    }

    #[test]
    fn push_constants_get_one_range_per_stage() {
        let vertex = reflection(Vec::new(), Some(PushConstantBlock { size: 64 }));
        let geometry = reflection(Vec::new(), None);
        let fragment = reflection(Vec::new(), Some(PushConstantBlock { size: 80 }));
        let ranges = merge_push_constants(&[
            (vk::ShaderStageFlags::VERTEX, &vertex),
            (vk::ShaderStageFlags::GEOMETRY, &geometry),
            (vk::ShaderStageFlags::FRAGMENT, &fragment),
        ]);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(ranges[0].offset, 0);
        assert_eq!(ranges[0].size, 64);
        assert_eq!(ranges[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ranges[1].size, 80);
    }

    #[test]
    fn compute_module_is_rejected() {
        assert!(graphics_stage_flags(ExecutionModel::Fragment).is_ok());
        assert!(matches!(
            graphics_stage_flags(ExecutionModel::Compute),
            Err(GpuError::ShaderReflect(_))
        ));
    }

    #[test]
    fn vertex_attributes_pack_by_location() {
        let inputs = vec![
            InputVariable {
                location: 1,
                kind: NumericKind::Float,
                width: 32,
                components: 2,
            },
            InputVariable {
                location: 0,
                kind: NumericKind::Float,
                width: 32,
                components: 3,
            },
        ];
        let (attributes, stride) = derive_vertex_input(&inputs).unwrap();
        assert_eq!(stride, 20);
        assert_eq!(attributes[0].location, 0);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attributes[1].location, 1);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
    }
}
