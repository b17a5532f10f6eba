//! Low-level IR: register-machine instructions over virtual temps.
//!
//! LIR blocks carry two CFG variants. The *logical* edges mirror the HIR
//! control flow and are what per-lane (vgpr) values flow along; the
//! *linearized* edges describe the wave-level execution order, which scalar
//! mask values flow along. Both are index lists into [`Program::blocks`].

/// Register bank of a temp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// Scalar (wave-uniform) general-purpose registers.
    Sgpr,
    /// Vector (per-lane) general-purpose registers.
    Vgpr,
    /// Single-bit scalar condition code.
    Scc,
}

/// A physical register location: a byte address with 4-byte granularity.
/// The scalar bank occupies bytes `0..512`, the vector bank `1024..2048`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysReg(pub u32);

/// Index into the program's temp table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TempId(pub u32);

/// Register class and byte size of a temp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TempInfo {
    pub class: RegClass,
    /// Byte size: 4, 8, 12, 16 or 32.
    pub size: u32,
}

/// An instruction argument: either an inline 32-bit constant or a temp
/// reference, optionally pinned to a physical register and, for operands,
/// carrying a kill bit (last use on the linear path).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg {
    Constant(u32),
    Temp {
        id: TempId,
        fixed: Option<PhysReg>,
        kill: bool,
    },
}

impl Arg {
    pub fn temp(id: TempId) -> Self {
        Arg::Temp {
            id,
            fixed: None,
            kill: false,
        }
    }

    pub fn fixed_temp(id: TempId, reg: PhysReg) -> Self {
        Arg::Temp {
            id,
            fixed: Some(reg),
            kill: false,
        }
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Arg::Temp { .. })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Arg::Constant(_))
    }

    pub fn temp_id(&self) -> Option<TempId> {
        match self {
            Arg::Temp { id, .. } => Some(*id),
            Arg::Constant(_) => None,
        }
    }

    pub fn set_temp_id(&mut self, new_id: TempId) {
        if let Arg::Temp { id, .. } = self {
            *id = new_id;
        }
    }

    pub fn phys_reg(&self) -> Option<PhysReg> {
        match self {
            Arg::Temp { fixed, .. } => *fixed,
            Arg::Constant(_) => None,
        }
    }

    pub fn set_fixed(&mut self, reg: PhysReg) {
        if let Arg::Temp { fixed, .. } = self {
            *fixed = Some(reg);
        }
    }

    pub fn kill(&self) -> bool {
        matches!(self, Arg::Temp { kill: true, .. })
    }

    pub fn set_kill(&mut self, value: bool) {
        if let Arg::Temp { kill, .. } = self {
            *kill = value;
        }
    }

    pub fn constant_value(&self) -> Option<u32> {
        match self {
            Arg::Constant(v) => Some(*v),
            Arg::Temp { .. } => None,
        }
    }
}

/// Builds a constant argument from the bit pattern of an `f32`.
pub fn float_constant(v: f32) -> Arg {
    Arg::Constant(v.to_bits())
}

/// LIR operation codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    /// Defines the physical inputs of the wave in the entry block.
    Start,
    /// Marks block entry; collects the incoming mask predicates.
    StartBlock,
    /// Simultaneous assignment of all its source/destination pairs.
    ParallelCopy,
    Phi,
    /// Copies the current exec mask into the successor's mask temp.
    LogicalBranch,
    /// Splits the current exec mask by a predicate into two successor masks.
    LogicalCondBranch,
    SEndpgm,
    VCmpLtF32,
    Exp,
    VInterpP1F32,
    VInterpP2F32,
}

impl OpCode {
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Start => "start",
            OpCode::StartBlock => "start_block",
            OpCode::ParallelCopy => "parallel_copy",
            OpCode::Phi => "phi",
            OpCode::LogicalBranch => "logical_branch",
            OpCode::LogicalCondBranch => "logical_cond_branch",
            OpCode::SEndpgm => "s_endpgm",
            OpCode::VCmpLtF32 => "v_cmp_lt_f32",
            OpCode::Exp => "exp",
            OpCode::VInterpP1F32 => "v_interp_p1_f32",
            OpCode::VInterpP2F32 => "v_interp_p2_f32",
        }
    }
}

/// Per-family auxiliary payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aux {
    None,
    Interp {
        attribute: u32,
        channel: u32,
    },
    Export {
        enable: u8,
        target: u8,
        compressed: bool,
        done: bool,
        valid_mask: bool,
    },
}

/// An instruction with separate definition and operand argument arrays.
#[derive(Clone, Debug)]
pub struct Inst {
    pub op: OpCode,
    pub defs: Vec<Arg>,
    pub ops: Vec<Arg>,
    pub aux: Aux,
}

impl Inst {
    pub fn new(op: OpCode, defs: Vec<Arg>, ops: Vec<Arg>) -> Self {
        Self {
            op,
            defs,
            ops,
            aux: Aux::None,
        }
    }

    pub fn with_aux(op: OpCode, defs: Vec<Arg>, ops: Vec<Arg>, aux: Aux) -> Self {
        Self { op, defs, ops, aux }
    }

    pub fn is_phi(&self) -> bool {
        self.op == OpCode::Phi
    }
}

/// A LIR block with its two neighbor-list variants.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub id: usize,
    pub insts: Vec<Inst>,
    pub logical_preds: Vec<usize>,
    pub logical_succs: Vec<usize>,
    pub linearized_preds: Vec<usize>,
    pub linearized_succs: Vec<usize>,
}

impl Block {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// A LIR program: blocks in emission order plus the temp table.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub blocks: Vec<Block>,
    temps: Vec<TempInfo>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_temp(&mut self, class: RegClass, size: u32) -> TempId {
        let id = TempId(self.temps.len() as u32);
        self.temps.push(TempInfo { class, size });
        id
    }

    pub fn temp_info(&self, id: TempId) -> TempInfo {
        self.temps[id.0 as usize]
    }

    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }
}
