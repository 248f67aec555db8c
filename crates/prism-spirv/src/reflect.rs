//! Shader stage reflection.
//!
//! Walks a module's instruction stream once, recording decorations, the type
//! tree, and global variables, then derives the records `prism-gpu` needs to
//! build pipeline layouts: input attributes, descriptor bindings, and the
//! push-constant block.

use std::collections::HashMap;

use crate::decode::{ModuleReader, words_from_bytes};
use crate::{ReflectError, Result};

/// Opcodes the reflector cares about.
mod op {
    pub const ENTRY_POINT: u16 = 15;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_BOOL: u16 = 20;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_MATRIX: u16 = 24;
    pub const TYPE_IMAGE: u16 = 25;
    pub const TYPE_SAMPLER: u16 = 26;
    pub const TYPE_SAMPLED_IMAGE: u16 = 27;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const CONSTANT: u16 = 43;
    pub const FUNCTION: u16 = 54;
    pub const VARIABLE: u16 = 59;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
}

/// Decoration numbers.
mod dec {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const LOCATION: u32 = 30;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

/// Storage class numbers.
mod storage {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const INPUT: u32 = 1;
    pub const UNIFORM: u32 = 2;
    pub const PUSH_CONSTANT: u32 = 9;
    pub const STORAGE_BUFFER: u32 = 12;
}

/// Shader stage this module was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionModel {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ExecutionModel {
    fn from_raw(raw: u32) -> Result<Self> {
        Ok(match raw {
            0 => Self::Vertex,
            1 => Self::TessellationControl,
            2 => Self::TessellationEvaluation,
            3 => Self::Geometry,
            4 => Self::Fragment,
            5 => Self::Compute,
            other => {
                return Err(ReflectError::Unsupported(format!(
                    "execution model {other}"
                )))
            }
        })
    }
}

/// Scalar component kind of a numeric input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Float,
    Int,
    Uint,
}

/// A decorated shader input variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputVariable {
    pub location: u32,
    pub kind: NumericKind,
    /// Component width in bits.
    pub width: u32,
    /// Number of components (1 for scalars).
    pub components: u32,
}

/// Kind of resource behind a (set, binding) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    Sampler,
}

/// A reflected descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    /// Array length, 1 for non-arrays.
    pub count: u32,
}

/// The stage's push-constant block, if declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantBlock {
    /// Byte size, from the last member's offset plus its size.
    pub size: u32,
}

/// Everything reflected out of one shader stage.
#[derive(Debug, Clone)]
pub struct StageReflection {
    pub execution_model: ExecutionModel,
    pub entry_point: String,
    /// Input variables, unsorted (callers sort by location).
    pub inputs: Vec<InputVariable>,
    pub bindings: Vec<DescriptorBinding>,
    pub push_constant: Option<PushConstantBlock>,
}

impl StageReflection {
    /// Reflect a module given as a byte blob.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        let words = words_from_bytes(bytes)?;
        Self::parse(&words)
    }

    /// Reflect a module given as a word stream.
    pub fn parse(words: &[u32]) -> Result<Self> {
        let reader = ModuleReader::new(words)?;
        let mut walk = Walk::default();

        for inst in reader {
            let inst = inst?;
            // Types, variables, and decorations all precede function bodies.
            if inst.opcode == op::FUNCTION {
                break;
            }
            walk.record(&inst)?;
        }

        walk.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Type {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    Image { sampled: u32 },
    Sampler,
    SampledImage,
    Array { element: u32, length_id: u32 },
    RuntimeArray,
    Struct,
    Pointer { storage_class: u32, pointee: u32 },
}

#[derive(Debug, Default, Clone, Copy)]
struct Decorations {
    location: Option<u32>,
    set: Option<u32>,
    binding: Option<u32>,
    block: bool,
    buffer_block: bool,
    array_stride: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Variable {
    result_id: u32,
    pointer_type: u32,
    storage_class: u32,
}

/// Accumulated module state while walking the instruction stream.
#[derive(Default)]
struct Walk {
    entry: Option<(ExecutionModel, String)>,
    types: HashMap<u32, Type>,
    constants: HashMap<u32, u32>,
    decorations: HashMap<u32, Decorations>,
    /// struct id -> member index -> byte offset
    member_offsets: HashMap<u32, HashMap<u32, u32>>,
    /// struct id -> member type ids
    struct_members: HashMap<u32, Vec<u32>>,
    variables: Vec<Variable>,
}

impl Walk {
    fn record(&mut self, inst: &crate::decode::Instruction<'_>) -> Result<()> {
        let ops = inst.operands;
        let short = || ReflectError::InvalidBinary(format!("short opcode {}", inst.opcode));

        match inst.opcode {
            op::ENTRY_POINT => {
                if self.entry.is_none() {
                    let model = ExecutionModel::from_raw(*ops.first().ok_or_else(short)?)?;
                    let (name, _) = inst.string_at(2)?;
                    self.entry = Some((model, name));
                }
            }
            op::DECORATE => {
                let &[target, kind, ..] = ops else {
                    return Err(short());
                };
                let entry = self.decorations.entry(target).or_default();
                let literal = ops.get(2).copied();
                match kind {
                    dec::BLOCK => entry.block = true,
                    dec::BUFFER_BLOCK => entry.buffer_block = true,
                    dec::LOCATION => entry.location = literal,
                    dec::BINDING => entry.binding = literal,
                    dec::DESCRIPTOR_SET => entry.set = literal,
                    dec::ARRAY_STRIDE => entry.array_stride = literal,
                    _ => {}
                }
            }
            op::MEMBER_DECORATE => {
                let &[target, member, kind, ..] = ops else {
                    return Err(short());
                };
                if kind == dec::OFFSET {
                    let offset = *ops.get(3).ok_or_else(short)?;
                    self.member_offsets
                        .entry(target)
                        .or_default()
                        .insert(member, offset);
                }
            }
            op::TYPE_VOID => self.record_type(ops, Type::Void)?,
            op::TYPE_BOOL => self.record_type(ops, Type::Bool)?,
            op::TYPE_INT => {
                let &[id, width, signed] = ops else {
                    return Err(short());
                };
                self.types.insert(
                    id,
                    Type::Int {
                        width,
                        signed: signed == 1,
                    },
                );
            }
            op::TYPE_FLOAT => {
                let &[id, width, ..] = ops else {
                    return Err(short());
                };
                self.types.insert(id, Type::Float { width });
            }
            op::TYPE_VECTOR => {
                let &[id, component, count] = ops else {
                    return Err(short());
                };
                self.types.insert(id, Type::Vector { component, count });
            }
            op::TYPE_MATRIX => {
                let &[id, column, count] = ops else {
                    return Err(short());
                };
                self.types.insert(id, Type::Matrix { column, count });
            }
            op::TYPE_IMAGE => {
                let id = *ops.first().ok_or_else(short)?;
                // operands: sampled type, dim, depth, arrayed, ms, sampled, format
                let sampled = *ops.get(6).ok_or_else(short)?;
                self.types.insert(id, Type::Image { sampled });
            }
            op::TYPE_SAMPLER => self.record_type(ops, Type::Sampler)?,
            op::TYPE_SAMPLED_IMAGE => self.record_type(ops, Type::SampledImage)?,
            op::TYPE_ARRAY => {
                let &[id, element, length_id] = ops else {
                    return Err(short());
                };
                self.types.insert(id, Type::Array { element, length_id });
            }
            op::TYPE_RUNTIME_ARRAY => self.record_type(ops, Type::RuntimeArray)?,
            op::TYPE_STRUCT => {
                let id = *ops.first().ok_or_else(short)?;
                self.types.insert(id, Type::Struct);
                self.struct_members.insert(id, ops[1..].to_vec());
            }
            op::TYPE_POINTER => {
                let &[id, storage_class, pointee] = ops else {
                    return Err(short());
                };
                self.types.insert(
                    id,
                    Type::Pointer {
                        storage_class,
                        pointee,
                    },
                );
            }
            op::CONSTANT => {
                let &[_ty, id, value, ..] = ops else {
                    return Err(short());
                };
                self.constants.insert(id, value);
            }
            op::VARIABLE => {
                let &[pointer_type, result_id, storage_class, ..] = ops else {
                    return Err(short());
                };
                self.variables.push(Variable {
                    result_id,
                    pointer_type,
                    storage_class,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn record_type(&mut self, ops: &[u32], ty: Type) -> Result<()> {
        let id = *ops.first().ok_or_else(|| {
            ReflectError::InvalidBinary("type instruction without result id".to_string())
        })?;
        self.types.insert(id, ty);
        Ok(())
    }

    fn finish(self) -> Result<StageReflection> {
        let (execution_model, entry_point) = self
            .entry
            .clone()
            .ok_or_else(|| ReflectError::InvalidBinary("module has no entry point".to_string()))?;

        let mut inputs = Vec::new();
        let mut bindings = Vec::new();
        let mut push_constant = None;

        for var in &self.variables {
            match var.storage_class {
                storage::INPUT => {
                    if let Some(input) = self.reflect_input(var)? {
                        inputs.push(input);
                    }
                }
                storage::UNIFORM_CONSTANT | storage::UNIFORM | storage::STORAGE_BUFFER => {
                    bindings.push(self.reflect_binding(var)?);
                }
                storage::PUSH_CONSTANT => {
                    if push_constant.is_some() {
                        return Err(ReflectError::Unsupported(
                            "multiple push-constant blocks in one stage".to_string(),
                        ));
                    }
                    push_constant = Some(PushConstantBlock {
                        size: self.push_constant_size(var)?,
                    });
                }
                _ => {}
            }
        }

        Ok(StageReflection {
            execution_model,
            entry_point,
            inputs,
            bindings,
            push_constant,
        })
    }

    fn type_of(&self, id: u32) -> Result<Type> {
        self.types
            .get(&id)
            .copied()
            .ok_or_else(|| ReflectError::InvalidBinary(format!("unknown type id {id}")))
    }

    fn pointee(&self, var: &Variable) -> Result<u32> {
        match self.type_of(var.pointer_type)? {
            Type::Pointer { pointee, .. } => Ok(pointee),
            _ => Err(ReflectError::InvalidBinary(format!(
                "variable {} without a pointer type",
                var.result_id
            ))),
        }
    }

    fn reflect_input(&self, var: &Variable) -> Result<Option<InputVariable>> {
        // Built-ins (gl_VertexIndex and friends) carry no Location.
        let Some(location) = self
            .decorations
            .get(&var.result_id)
            .and_then(|d| d.location)
        else {
            return Ok(None);
        };

        let (kind, width, components) = match self.type_of(self.pointee(var)?)? {
            Type::Float { width } => (NumericKind::Float, width, 1),
            Type::Int { width, signed } => (
                if signed {
                    NumericKind::Int
                } else {
                    NumericKind::Uint
                },
                width,
                1,
            ),
            Type::Vector { component, count } => match self.type_of(component)? {
                Type::Float { width } => (NumericKind::Float, width, count),
                Type::Int { width, signed } => (
                    if signed {
                        NumericKind::Int
                    } else {
                        NumericKind::Uint
                    },
                    width,
                    count,
                ),
                other => {
                    return Err(ReflectError::Unsupported(format!(
                        "vector input of {other:?}"
                    )))
                }
            },
            other => {
                return Err(ReflectError::Unsupported(format!(
                    "input variable of {other:?}"
                )))
            }
        };

        Ok(Some(InputVariable {
            location,
            kind,
            width,
            components,
        }))
    }

    fn reflect_binding(&self, var: &Variable) -> Result<DescriptorBinding> {
        let decor = self.decorations.get(&var.result_id).copied().unwrap_or_default();
        let (Some(set), Some(binding)) = (decor.set, decor.binding) else {
            return Err(ReflectError::InvalidBinary(format!(
                "uniform variable {} lacks set/binding decorations",
                var.result_id
            )));
        };

        // Descriptor arrays wrap the resource type.
        let mut pointee = self.pointee(var)?;
        let mut count = 1;
        if let Type::Array { element, length_id } = self.type_of(pointee)? {
            count = *self.constants.get(&length_id).ok_or_else(|| {
                ReflectError::InvalidBinary(format!("array length {length_id} is not a constant"))
            })?;
            pointee = element;
        }

        let type_decor = self.decorations.get(&pointee).copied().unwrap_or_default();
        let kind = match self.type_of(pointee)? {
            Type::SampledImage => DescriptorKind::CombinedImageSampler,
            Type::Sampler => DescriptorKind::Sampler,
            Type::Image { sampled: 2 } => DescriptorKind::StorageImage,
            Type::Image { .. } => DescriptorKind::SampledImage,
            Type::Struct if var.storage_class == storage::STORAGE_BUFFER => {
                DescriptorKind::StorageBuffer
            }
            Type::Struct if type_decor.buffer_block => DescriptorKind::StorageBuffer,
            Type::Struct if type_decor.block => DescriptorKind::UniformBuffer,
            other => {
                return Err(ReflectError::Unsupported(format!(
                    "descriptor of {other:?} at set {set} binding {binding}"
                )))
            }
        };

        Ok(DescriptorBinding {
            set,
            binding,
            kind,
            count,
        })
    }

    fn push_constant_size(&self, var: &Variable) -> Result<u32> {
        let block = self.pointee(var)?;
        if !matches!(self.type_of(block)?, Type::Struct) {
            return Err(ReflectError::InvalidBinary(
                "push-constant variable is not a struct block".to_string(),
            ));
        }
        self.struct_size(block)
    }

    /// Byte size of a (struct) type, from member offsets and member sizes.
    fn struct_size(&self, id: u32) -> Result<u32> {
        let members = self.struct_members.get(&id).ok_or_else(|| {
            ReflectError::InvalidBinary(format!("struct {id} without member list"))
        })?;
        let offsets = self.member_offsets.get(&id);

        let mut size = 0;
        for (index, &member) in members.iter().enumerate() {
            let offset = offsets
                .and_then(|m| m.get(&(index as u32)))
                .copied()
                .ok_or_else(|| {
                    ReflectError::InvalidBinary(format!("struct {id} member {index} has no offset"))
                })?;
            size = size.max(offset + self.scalar_size(member)?);
        }
        Ok(size)
    }

    /// Byte size of a non-opaque type.
    fn scalar_size(&self, id: u32) -> Result<u32> {
        Ok(match self.type_of(id)? {
            Type::Bool => 4,
            Type::Int { width, .. } | Type::Float { width } => width / 8,
            Type::Vector { component, count } => count * self.scalar_size(component)?,
            Type::Matrix { column, count } => count * self.scalar_size(column)?,
            Type::Array { element, length_id } => {
                let length = *self.constants.get(&length_id).ok_or_else(|| {
                    ReflectError::InvalidBinary(format!(
                        "array length {length_id} is not a constant"
                    ))
                })?;
                let stride = self
                    .decorations
                    .get(&id)
                    .and_then(|d| d.array_stride)
                    .map_or_else(|| self.scalar_size(element), Ok)?;
                stride * length
            }
            Type::Struct => self.struct_size(id)?,
            other => {
                return Err(ReflectError::Unsupported(format!(
                    "sized query on {other:?}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SPIRV_MAGIC;

    /// Minimal in-test assembler mirroring the binary layout the decoder reads.
    struct Asm {
        words: Vec<u32>,
    }

    impl Asm {
        fn new() -> Self {
            Self {
                words: vec![SPIRV_MAGIC, 0x0001_0000, 0, 200, 0],
            }
        }

        fn inst(&mut self, opcode: u16, operands: &[u32]) -> &mut Self {
            self.words.push(((operands.len() as u32 + 1) << 16) | u32::from(opcode));
            self.words.extend_from_slice(operands);
            self
        }

        fn entry_point(&mut self, model: u32, name: &str) -> &mut Self {
            let mut ops = vec![model, 1];
            ops.extend(pack_string(name));
            self.inst(op::ENTRY_POINT, &ops)
        }
    }

    fn pack_string(s: &str) -> Vec<u32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    // Common ids used by the test modules.
    const T_FLOAT: u32 = 10;
    const T_VEC3: u32 = 11;
    const T_VEC2: u32 = 12;
    const T_UINT: u32 = 13;
    const T_STRUCT: u32 = 20;
    const T_PTR_UBO: u32 = 21;
    const T_SAMPLED: u32 = 30;
    const T_IMAGE: u32 = 31;
    const T_PTR_TEX: u32 = 32;

    fn base_types(asm: &mut Asm) {
        asm.inst(op::TYPE_FLOAT, &[T_FLOAT, 32]);
        asm.inst(op::TYPE_VECTOR, &[T_VEC3, T_FLOAT, 3]);
        asm.inst(op::TYPE_VECTOR, &[T_VEC2, T_FLOAT, 2]);
        asm.inst(op::TYPE_INT, &[T_UINT, 32, 0]);
    }

    #[test]
    fn reflects_vertex_inputs() {
        let mut asm = Asm::new();
        asm.entry_point(0, "main");
        // location decorations for ids 40 and 41; 42 is an undecorated built-in
        asm.inst(op::DECORATE, &[40, dec::LOCATION, 1]);
        asm.inst(op::DECORATE, &[41, dec::LOCATION, 0]);
        base_types(&mut asm);
        asm.inst(op::TYPE_POINTER, &[50, storage::INPUT, T_VEC2]);
        asm.inst(op::TYPE_POINTER, &[51, storage::INPUT, T_VEC3]);
        asm.inst(op::TYPE_POINTER, &[52, storage::INPUT, T_UINT]);
        asm.inst(op::VARIABLE, &[50, 40, storage::INPUT]);
        asm.inst(op::VARIABLE, &[51, 41, storage::INPUT]);
        asm.inst(op::VARIABLE, &[52, 42, storage::INPUT]);
        asm.inst(op::FUNCTION, &[1, 2, 3, 4]);

        let reflection = StageReflection::parse(&asm.words).unwrap();
        assert_eq!(reflection.execution_model, ExecutionModel::Vertex);
        assert_eq!(reflection.entry_point, "main");
        assert_eq!(reflection.inputs.len(), 2);

        let at = |loc| {
            reflection
                .inputs
                .iter()
                .find(|i| i.location == loc)
                .copied()
                .unwrap()
        };
        assert_eq!(
            at(0),
            InputVariable {
                location: 0,
                kind: NumericKind::Float,
                width: 32,
                components: 3
            }
        );
        assert_eq!(at(1).components, 2);
    }

    #[test]
    fn reflects_descriptor_bindings() {
        let mut asm = Asm::new();
        asm.entry_point(4, "main");
        asm.inst(op::DECORATE, &[T_STRUCT, dec::BLOCK]);
        asm.inst(op::MEMBER_DECORATE, &[T_STRUCT, 0, dec::OFFSET, 0]);
        asm.inst(op::DECORATE, &[60, dec::DESCRIPTOR_SET, 0]);
        asm.inst(op::DECORATE, &[60, dec::BINDING, 0]);
        asm.inst(op::DECORATE, &[61, dec::DESCRIPTOR_SET, 1]);
        asm.inst(op::DECORATE, &[61, dec::BINDING, 2]);
        base_types(&mut asm);
        asm.inst(op::TYPE_STRUCT, &[T_STRUCT, T_VEC3]);
        asm.inst(op::TYPE_POINTER, &[T_PTR_UBO, storage::UNIFORM, T_STRUCT]);
        // sampled image array of 3
        asm.inst(op::TYPE_IMAGE, &[T_IMAGE, T_FLOAT, 1, 0, 0, 0, 1, 0]);
        asm.inst(op::TYPE_SAMPLED_IMAGE, &[T_SAMPLED, T_IMAGE]);
        asm.inst(op::CONSTANT, &[T_UINT, 70, 3]);
        asm.inst(op::TYPE_ARRAY, &[71, T_SAMPLED, 70]);
        asm.inst(op::TYPE_POINTER, &[T_PTR_TEX, storage::UNIFORM_CONSTANT, 71]);
        asm.inst(op::VARIABLE, &[T_PTR_UBO, 60, storage::UNIFORM]);
        asm.inst(op::VARIABLE, &[T_PTR_TEX, 61, storage::UNIFORM_CONSTANT]);

        let reflection = StageReflection::parse(&asm.words).unwrap();
        assert_eq!(reflection.execution_model, ExecutionModel::Fragment);
        assert_eq!(reflection.bindings.len(), 2);
        assert!(reflection.bindings.contains(&DescriptorBinding {
            set: 0,
            binding: 0,
            kind: DescriptorKind::UniformBuffer,
            count: 1
        }));
        assert!(reflection.bindings.contains(&DescriptorBinding {
            set: 1,
            binding: 2,
            kind: DescriptorKind::CombinedImageSampler,
            count: 3
        }));
    }

    #[test]
    fn push_constant_size_spans_members() {
        let mut asm = Asm::new();
        asm.entry_point(0, "main");
        asm.inst(op::MEMBER_DECORATE, &[T_STRUCT, 0, dec::OFFSET, 0]);
        asm.inst(op::MEMBER_DECORATE, &[T_STRUCT, 1, dec::OFFSET, 16]);
        base_types(&mut asm);
        asm.inst(op::TYPE_STRUCT, &[T_STRUCT, T_VEC3, T_VEC2]);
        asm.inst(op::TYPE_POINTER, &[T_PTR_UBO, storage::PUSH_CONSTANT, T_STRUCT]);
        asm.inst(op::VARIABLE, &[T_PTR_UBO, 60, storage::PUSH_CONSTANT]);

        let reflection = StageReflection::parse(&asm.words).unwrap();
        // vec2 at offset 16 ends at 24
        assert_eq!(reflection.push_constant, Some(PushConstantBlock { size: 24 }));
    }

    #[test]
    fn missing_entry_point_is_rejected() {
        let mut asm = Asm::new();
        base_types(&mut asm);
        assert!(matches!(
            StageReflection::parse(&asm.words),
            Err(ReflectError::InvalidBinary(_))
        ));
    }

    #[test]
    fn undeclared_set_decoration_is_rejected() {
        let mut asm = Asm::new();
        asm.entry_point(4, "main");
        asm.inst(op::DECORATE, &[T_STRUCT, dec::BLOCK]);
        base_types(&mut asm);
        asm.inst(op::TYPE_STRUCT, &[T_STRUCT, T_VEC3]);
        asm.inst(op::TYPE_POINTER, &[T_PTR_UBO, storage::UNIFORM, T_STRUCT]);
        asm.inst(op::VARIABLE, &[T_PTR_UBO, 60, storage::UNIFORM]);

        assert!(StageReflection::parse(&asm.words).is_err());
    }
}
