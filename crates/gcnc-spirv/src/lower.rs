//! Lowering from rspirv's data representation to HIR.
//!
//! The module is consumed in the order the binary lays it out: capabilities
//! and entry points, then types/constants/globals, then the entry function's
//! body. Around the user's code the lowering synthesizes the I/O staging the
//! later passes expect: a prolog that stores one fresh parameter per input
//! component into the input variable, and an epilog that loads every output
//! component and feeds them all to the final `ret`.

use std::collections::HashMap;

use rspirv::dr;
use rspirv::spirv::{self, Op};

use gcnc_ir::hir::{BlockId, DefId, OpCode, Program, ProgramKind};
use gcnc_ir::types::{StorageClass, Type, TypeTable};

use crate::LoadError;

#[derive(Clone, Copy, Default)]
enum Object {
    #[default]
    None,
    Type(Type),
    Def(DefId),
}

struct Lowerer {
    program: Program,
    objects: Vec<Object>,
    /// Module-scope variables by SPIR-V id, with their declared storage.
    global_vars: HashMap<u32, (DefId, spirv::StorageClass)>,
    /// Composite constants to materialize at the head of the entry block.
    pending_composites: Vec<(u32, Type, Vec<u32>)>,
}

pub fn lower_module(module: &dr::Module, entry: &str) -> Result<Program, LoadError> {
    for capability in &module.capabilities {
        match capability.operands.first() {
            Some(dr::Operand::Capability(spirv::Capability::Shader)) => {}
            Some(dr::Operand::Capability(other)) => {
                return Err(LoadError::UnsupportedCapability(*other));
            }
            _ => return Err(LoadError::MalformedOperands(Op::Capability)),
        }
    }
    for import in &module.ext_inst_imports {
        match import.operands.first() {
            Some(dr::Operand::LiteralString(name)) if name == "GLSL.std.450" => {}
            Some(dr::Operand::LiteralString(name)) => {
                return Err(LoadError::UnsupportedExtSet(name.clone()));
            }
            _ => return Err(LoadError::MalformedOperands(Op::ExtInstImport)),
        }
    }

    let (kind, function_id, interface) = select_entry(module, entry)?;

    let bound = module
        .header
        .as_ref()
        .map(|h| h.bound as usize)
        .unwrap_or_default();
    let mut lowerer = Lowerer {
        program: Program::new(kind),
        objects: vec![Object::None; bound],
        global_vars: HashMap::new(),
        pending_composites: Vec::new(),
    };

    lowerer.lower_globals(module)?;
    lowerer.lower_entry_function(module, function_id, &interface)?;
    Ok(lowerer.program)
}

/// Finds the entry point with the requested name and returns its shader
/// stage, function id and interface variable ids.
fn select_entry(
    module: &dr::Module,
    entry: &str,
) -> Result<(ProgramKind, u32, Vec<u32>), LoadError> {
    for ep in &module.entry_points {
        let model = match ep.operands.first() {
            Some(dr::Operand::ExecutionModel(model)) => *model,
            _ => return Err(LoadError::MalformedOperands(Op::EntryPoint)),
        };
        let function = match ep.operands.get(1) {
            Some(dr::Operand::IdRef(id)) => *id,
            _ => return Err(LoadError::MalformedOperands(Op::EntryPoint)),
        };
        let name = match ep.operands.get(2) {
            Some(dr::Operand::LiteralString(name)) => name,
            _ => return Err(LoadError::MalformedOperands(Op::EntryPoint)),
        };
        if name != entry {
            continue;
        }
        let kind = match model {
            spirv::ExecutionModel::Fragment => ProgramKind::Fragment,
            spirv::ExecutionModel::Vertex => ProgramKind::Vertex,
            spirv::ExecutionModel::GLCompute => ProgramKind::Compute,
            other => return Err(LoadError::UnsupportedExecutionModel(other)),
        };
        let mut interface = Vec::new();
        for operand in &ep.operands[3..] {
            match operand {
                dr::Operand::IdRef(id) => interface.push(*id),
                _ => return Err(LoadError::MalformedOperands(Op::EntryPoint)),
            }
        }
        return Ok((kind, function, interface));
    }
    Err(LoadError::MissingEntryPoint(entry.to_string()))
}

fn storage_class(class: spirv::StorageClass) -> Result<StorageClass, LoadError> {
    match class {
        spirv::StorageClass::Function
        | spirv::StorageClass::Private
        | spirv::StorageClass::Input
        | spirv::StorageClass::Output => Ok(StorageClass::Invocation),
        other => Err(LoadError::UnsupportedStorageClass(other)),
    }
}

fn id_ref(inst: &dr::Instruction, index: usize) -> Result<u32, LoadError> {
    match inst.operands.get(index) {
        Some(dr::Operand::IdRef(id)) => Ok(*id),
        _ => Err(LoadError::MalformedOperands(inst.class.opcode)),
    }
}

fn literal32(inst: &dr::Instruction, index: usize) -> Result<u32, LoadError> {
    match inst.operands.get(index) {
        Some(dr::Operand::LiteralBit32(value)) => Ok(*value),
        _ => Err(LoadError::MalformedOperands(inst.class.opcode)),
    }
}

impl Lowerer {
    fn set_object(&mut self, id: u32, object: Object) -> Result<(), LoadError> {
        let slot = self
            .objects
            .get_mut(id as usize)
            .ok_or_else(|| LoadError::Malformed(format!("id %{id} exceeds the module bound")))?;
        *slot = object;
        Ok(())
    }

    fn type_of(&self, id: u32) -> Result<Type, LoadError> {
        match self.objects.get(id as usize) {
            Some(Object::Type(ty)) => Ok(*ty),
            _ => Err(LoadError::WrongIdKind(id, "type")),
        }
    }

    fn def_of(&self, id: u32) -> Result<DefId, LoadError> {
        match self.objects.get(id as usize) {
            Some(Object::Def(def)) => Ok(*def),
            _ => Err(LoadError::WrongIdKind(id, "value")),
        }
    }

    fn result_type(&self, inst: &dr::Instruction) -> Result<Type, LoadError> {
        let id = inst
            .result_type
            .ok_or(LoadError::MalformedOperands(inst.class.opcode))?;
        self.type_of(id)
    }

    fn result_id(&self, inst: &dr::Instruction) -> Result<u32, LoadError> {
        inst.result_id
            .ok_or(LoadError::MalformedOperands(inst.class.opcode))
    }

    fn lower_globals(&mut self, module: &dr::Module) -> Result<(), LoadError> {
        for inst in &module.types_global_values {
            match inst.class.opcode {
                Op::TypeVoid => {
                    let id = self.result_id(inst)?;
                    self.set_object(id, Object::Type(TypeTable::VOID))?;
                }
                Op::TypeBool => {
                    let id = self.result_id(inst)?;
                    self.set_object(id, Object::Type(TypeTable::BOOL))?;
                }
                Op::TypeInt => {
                    let id = self.result_id(inst)?;
                    let width = literal32(inst, 0)?;
                    let ty = TypeTable::int(width).ok_or(LoadError::UnsupportedWidth(width))?;
                    self.set_object(id, Object::Type(ty))?;
                }
                Op::TypeFloat => {
                    let id = self.result_id(inst)?;
                    let width = literal32(inst, 0)?;
                    let ty = TypeTable::float(width).ok_or(LoadError::UnsupportedWidth(width))?;
                    self.set_object(id, Object::Type(ty))?;
                }
                Op::TypeVector => {
                    let id = self.result_id(inst)?;
                    let element = self.type_of(id_ref(inst, 0)?)?;
                    let size = literal32(inst, 1)?;
                    let ty = self.program.types_mut().vector(element, size as u8);
                    self.set_object(id, Object::Type(ty))?;
                }
                Op::TypePointer => {
                    let id = self.result_id(inst)?;
                    let class = match inst.operands.first() {
                        Some(dr::Operand::StorageClass(class)) => storage_class(*class)?,
                        _ => return Err(LoadError::MalformedOperands(Op::TypePointer)),
                    };
                    let pointee = self.type_of(id_ref(inst, 1)?)?;
                    let ty = self.program.types_mut().pointer(pointee, class);
                    self.set_object(id, Object::Type(ty))?;
                }
                Op::TypeFunction => {
                    // Function signatures are irrelevant: only the single
                    // entry point is compiled.
                }
                Op::Constant => {
                    let id = self.result_id(inst)?;
                    let ty = self.result_type(inst)?;
                    let bits = match inst.operands.first() {
                        Some(dr::Operand::LiteralBit32(value)) => *value as u64,
                        Some(dr::Operand::LiteralBit64(value)) => *value,
                        _ => return Err(LoadError::MalformedOperands(Op::Constant)),
                    };
                    let def = self.program.scalar_constant(ty, bits);
                    self.set_object(id, Object::Def(def))?;
                }
                Op::ConstantTrue | Op::ConstantFalse => {
                    let id = self.result_id(inst)?;
                    let bits = (inst.class.opcode == Op::ConstantTrue) as u64;
                    let def = self.program.scalar_constant(TypeTable::BOOL, bits);
                    self.set_object(id, Object::Def(def))?;
                }
                Op::ConstantComposite => {
                    let id = self.result_id(inst)?;
                    let ty = self.result_type(inst)?;
                    let mut parts = Vec::with_capacity(inst.operands.len());
                    for index in 0..inst.operands.len() {
                        parts.push(id_ref(inst, index)?);
                    }
                    self.pending_composites.push((id, ty, parts));
                }
                Op::Variable => {
                    let id = self.result_id(inst)?;
                    let ty = self.result_type(inst)?;
                    let class = match inst.operands.first() {
                        Some(dr::Operand::StorageClass(class)) => *class,
                        _ => return Err(LoadError::MalformedOperands(Op::Variable)),
                    };
                    storage_class(class)?;
                    if inst.operands.len() > 1 {
                        return Err(LoadError::UnsupportedInitializer);
                    }
                    let def = self.program.create_inst(OpCode::Variable, ty, vec![]);
                    self.program.add_variable(def);
                    self.global_vars.insert(id, (def, class));
                    self.set_object(id, Object::Def(def))?;
                }
                other => return Err(LoadError::UnsupportedOpcode(other)),
            }
        }
        Ok(())
    }

    fn lower_entry_function(
        &mut self,
        module: &dr::Module,
        function_id: u32,
        interface: &[u32],
    ) -> Result<(), LoadError> {
        let function = module
            .functions
            .iter()
            .find(|f| {
                f.def
                    .as_ref()
                    .and_then(|def| def.result_id)
                    .map(|id| id == function_id)
                    .unwrap_or(false)
            })
            .ok_or_else(|| LoadError::Malformed(format!("function %{function_id} has no body")))?;

        // Partition the interface by declared storage.
        let mut inputs: Vec<DefId> = Vec::new();
        let mut outputs: Vec<DefId> = Vec::new();
        for &id in interface {
            let &(def, class) = self
                .global_vars
                .get(&id)
                .ok_or(LoadError::WrongIdKind(id, "interface variable"))?;
            if class == spirv::StorageClass::Input {
                inputs.push(def);
            } else {
                outputs.push(def);
            }
        }

        let entry_block = self.program.create_block();
        self.build_prolog(entry_block, &inputs)?;
        self.materialize_composites(entry_block)?;

        let exit_block = self.lower_body(function, entry_block)?;
        self.build_epilog(exit_block, &outputs)
    }

    /// One fresh parameter per input component, stored into the variable so
    /// the user code's loads see them.
    fn build_prolog(&mut self, block: BlockId, inputs: &[DefId]) -> Result<(), LoadError> {
        for &var in inputs {
            let (element, count) = self.interface_shape(var)?;
            for index in 0..count {
                let param = self.program.create_inst(OpCode::Parameter, element, vec![]);
                self.program.add_param(param);
                let chain = self.element_chain(block, var, element, index);
                let store = self.program.create_inst(
                    OpCode::Store,
                    TypeTable::VOID,
                    vec![chain, param],
                );
                self.program.push_inst(block, store);
            }
        }
        Ok(())
    }

    /// Loads every output component and returns them all.
    fn build_epilog(&mut self, block: BlockId, outputs: &[DefId]) -> Result<(), LoadError> {
        let mut values = Vec::new();
        for &var in outputs {
            let (element, count) = self.interface_shape(var)?;
            for index in 0..count {
                let chain = self.element_chain(block, var, element, index);
                let load = self.program.create_inst(OpCode::Load, element, vec![chain]);
                self.program.push_inst(block, load);
                values.push(load);
            }
        }
        let ret = self.program.create_inst(OpCode::Ret, TypeTable::VOID, values);
        self.program.push_inst(block, ret);
        Ok(())
    }

    /// Element type and arity of an interface variable, which must point at
    /// a vector.
    fn interface_shape(&self, var: DefId) -> Result<(Type, usize), LoadError> {
        let pointee = self
            .program
            .types()
            .pointee(self.program.def(var).ty())
            .ok_or(LoadError::NonVectorInterface)?;
        let count = self
            .program
            .types()
            .composite_count(pointee)
            .ok_or(LoadError::NonVectorInterface)?;
        let element = self
            .program
            .types()
            .element(pointee, 0)
            .ok_or(LoadError::NonVectorInterface)?;
        Ok((element, count))
    }

    fn element_chain(&mut self, block: BlockId, var: DefId, element: Type, index: usize) -> DefId {
        let ptr = self
            .program
            .types_mut()
            .pointer(element, StorageClass::Invocation);
        let selector = self.program.scalar_constant(TypeTable::INT32, index as u64);
        let chain = self
            .program
            .create_inst(OpCode::AccessChain, ptr, vec![var, selector]);
        self.program.push_inst(block, chain);
        chain
    }

    /// Turns deferred `OpConstantComposite`s into `composite_construct`s at
    /// the head of the entry block, in declaration order.
    fn materialize_composites(&mut self, block: BlockId) -> Result<(), LoadError> {
        let pending = std::mem::take(&mut self.pending_composites);
        let mut head = Vec::with_capacity(pending.len());
        for (id, ty, parts) in pending {
            let mut operands = Vec::with_capacity(parts.len());
            for part in parts {
                operands.push(self.def_of(part)?);
            }
            let construct = self
                .program
                .create_inst(OpCode::CompositeConstruct, ty, operands);
            head.push(construct);
            self.set_object(id, Object::Def(construct))?;
        }
        self.program.insert_insts_front(block, head);
        Ok(())
    }

    /// Lowers the entry function's blocks; returns the block that carries
    /// the function's return.
    fn lower_body(
        &mut self,
        function: &dr::Function,
        entry_block: BlockId,
    ) -> Result<BlockId, LoadError> {
        let mut blocks: HashMap<u32, BlockId> = HashMap::new();
        let mut current = entry_block;

        for (index, block) in function.blocks.iter().enumerate() {
            let label = block
                .label
                .as_ref()
                .and_then(|l| l.result_id)
                .ok_or(LoadError::MalformedOperands(Op::Label))?;
            if index == 0 {
                blocks.insert(label, entry_block);
                current = entry_block;
            } else {
                current = *blocks
                    .entry(label)
                    .or_insert_with(|| self.program.create_block());
            }

            for inst in &block.instructions {
                self.lower_inst(inst, current, &mut blocks)?;
            }
        }
        Ok(current)
    }

    fn lower_inst(
        &mut self,
        inst: &dr::Instruction,
        current: BlockId,
        blocks: &mut HashMap<u32, BlockId>,
    ) -> Result<(), LoadError> {
        match inst.class.opcode {
            Op::Variable => {
                let id = self.result_id(inst)?;
                let ty = self.result_type(inst)?;
                match inst.operands.first() {
                    Some(dr::Operand::StorageClass(class)) => {
                        storage_class(*class)?;
                    }
                    _ => return Err(LoadError::MalformedOperands(Op::Variable)),
                }
                if inst.operands.len() > 1 {
                    return Err(LoadError::UnsupportedInitializer);
                }
                let def = self.program.create_inst(OpCode::Variable, ty, vec![]);
                self.program.add_variable(def);
                self.set_object(id, Object::Def(def))?;
            }
            Op::AccessChain => {
                let id = self.result_id(inst)?;
                let ty = self.result_type(inst)?;
                let mut operands = Vec::with_capacity(inst.operands.len());
                for index in 0..inst.operands.len() {
                    operands.push(self.def_of(id_ref(inst, index)?)?);
                }
                let def = self.program.create_inst(OpCode::AccessChain, ty, operands);
                self.program.push_inst(current, def);
                self.set_object(id, Object::Def(def))?;
            }
            Op::Load => {
                let id = self.result_id(inst)?;
                let ty = self.result_type(inst)?;
                let pointer = self.def_of(id_ref(inst, 0)?)?;
                let def = self.program.create_inst(OpCode::Load, ty, vec![pointer]);
                self.program.push_inst(current, def);
                self.set_object(id, Object::Def(def))?;
            }
            Op::Store => {
                let pointer = self.def_of(id_ref(inst, 0)?)?;
                let value = self.def_of(id_ref(inst, 1)?)?;
                let def =
                    self.program
                        .create_inst(OpCode::Store, TypeTable::VOID, vec![pointer, value]);
                self.program.push_inst(current, def);
            }
            Op::VectorShuffle => {
                let id = self.result_id(inst)?;
                let ty = self.result_type(inst)?;
                let mut operands = vec![
                    self.def_of(id_ref(inst, 0)?)?,
                    self.def_of(id_ref(inst, 1)?)?,
                ];
                for index in 2..inst.operands.len() {
                    let component = literal32(inst, index)?;
                    operands.push(
                        self.program
                            .scalar_constant(TypeTable::INT32, component as u64),
                    );
                }
                let def = self
                    .program
                    .create_inst(OpCode::VectorShuffle, ty, operands);
                self.program.push_inst(current, def);
                self.set_object(id, Object::Def(def))?;
            }
            Op::FOrdLessThan => {
                let id = self.result_id(inst)?;
                let ty = self.result_type(inst)?;
                let lhs = self.def_of(id_ref(inst, 0)?)?;
                let rhs = self.def_of(id_ref(inst, 1)?)?;
                let def = self
                    .program
                    .create_inst(OpCode::OrderedLessThan, ty, vec![lhs, rhs]);
                self.program.push_inst(current, def);
                self.set_object(id, Object::Def(def))?;
            }
            Op::Branch => {
                let target = self.block_for(id_ref(inst, 0)?, blocks);
                let def = self
                    .program
                    .create_inst(OpCode::Branch, TypeTable::VOID, vec![]);
                self.program.push_inst(current, def);
                self.program.add_edge(current, target);
            }
            Op::BranchConditional => {
                let condition = self.def_of(id_ref(inst, 0)?)?;
                let true_block = self.block_for(id_ref(inst, 1)?, blocks);
                let false_block = self.block_for(id_ref(inst, 2)?, blocks);
                let def =
                    self.program
                        .create_inst(OpCode::CondBranch, TypeTable::VOID, vec![condition]);
                self.program.push_inst(current, def);
                self.program.add_edge(current, true_block);
                self.program.add_edge(current, false_block);
            }
            // The epilog appends the real ret after the body is lowered.
            Op::Return | Op::ReturnValue => {}
            // Structured-control-flow hints carry no semantics here.
            Op::SelectionMerge | Op::LoopMerge => {}
            Op::Line | Op::NoLine => {}
            other => return Err(LoadError::UnsupportedOpcode(other)),
        }
        Ok(())
    }

    fn block_for(&mut self, label: u32, blocks: &mut HashMap<u32, BlockId>) -> BlockId {
        *blocks
            .entry(label)
            .or_insert_with(|| self.program.create_block())
    }
}
