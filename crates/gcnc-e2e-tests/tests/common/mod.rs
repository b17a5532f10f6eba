//! Shared helpers: build SPIR-V fragment shaders in-process and drive the
//! whole pipeline over them.

use rspirv::binary::Assemble;
use rspirv::dr::Builder;
use rspirv::spirv::{
    AddressingModel, Capability, ExecutionMode, ExecutionModel, FunctionControl, MemoryModel,
    StorageClass, Word,
};

/// Builds fragment-shader modules with `vec4` inputs and one `vec4` output.
pub struct FragmentBuilder {
    pub b: Builder,
    pub void: Word,
    pub boolean: Word,
    pub float: Word,
    pub int: Word,
    pub v4: Word,
    in_elem_ptr: Word,
    out_elem_ptr: Word,
    fn_elem_ptr: Word,
    fn_v4_ptr: Word,
    fn_int_ptr: Word,
    pub inputs: Vec<Word>,
    pub output: Word,
    main: Word,
}

#[allow(dead_code)]
impl FragmentBuilder {
    /// Declares `input_count` `in vec4` variables and one `out vec4`, then
    /// opens the entry function and its first block.
    pub fn new(input_count: usize) -> Self {
        let mut b = Builder::new();
        b.set_version(1, 0);
        b.capability(Capability::Shader);
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        let void = b.type_void();
        let boolean = b.type_bool();
        let float = b.type_float(32);
        let int = b.type_int(32, 1);
        let v4 = b.type_vector(float, 4);
        let in_ptr = b.type_pointer(None, StorageClass::Input, v4);
        let out_ptr = b.type_pointer(None, StorageClass::Output, v4);
        let in_elem_ptr = b.type_pointer(None, StorageClass::Input, float);
        let out_elem_ptr = b.type_pointer(None, StorageClass::Output, float);
        let fn_elem_ptr = b.type_pointer(None, StorageClass::Function, float);
        let fn_v4_ptr = b.type_pointer(None, StorageClass::Function, v4);
        let fn_int_ptr = b.type_pointer(None, StorageClass::Function, int);

        let inputs: Vec<Word> = (0..input_count)
            .map(|_| b.variable(in_ptr, None, StorageClass::Input, None))
            .collect();
        let output = b.variable(out_ptr, None, StorageClass::Output, None);

        let fn_ty = b.type_function(void, vec![]);
        let main = b
            .begin_function(void, None, FunctionControl::NONE, fn_ty)
            .unwrap();
        b.begin_block(None).unwrap();

        Self {
            b,
            void,
            boolean,
            float,
            int,
            v4,
            in_elem_ptr,
            out_elem_ptr,
            fn_elem_ptr,
            fn_v4_ptr,
            fn_int_ptr,
            inputs,
            output,
            main,
        }
    }

    pub fn const_f(&mut self, value: f32) -> Word {
        let float = self.float;
        self.b.constant_bit32(float, value.to_bits())
    }

    pub fn const_i(&mut self, value: u32) -> Word {
        let int = self.int;
        self.b.constant_bit32(int, value)
    }

    /// Loads component `component` of input `input`.
    pub fn load_in(&mut self, input: usize, component: u32) -> Word {
        let selector = self.const_i(component);
        let var = self.inputs[input];
        let ptr = self
            .b
            .access_chain(self.in_elem_ptr, None, var, vec![selector])
            .unwrap();
        self.b.load(self.float, None, ptr, None, vec![]).unwrap()
    }

    /// Stores `value` into component `component` of the output.
    pub fn store_out(&mut self, component: u32, value: Word) {
        let selector = self.const_i(component);
        let var = self.output;
        let ptr = self
            .b
            .access_chain(self.out_elem_ptr, None, var, vec![selector])
            .unwrap();
        self.b.store(ptr, value, None, vec![]).unwrap();
    }

    /// Declares a function-local `vec4` variable.
    pub fn local_v4(&mut self) -> Word {
        let ty = self.fn_v4_ptr;
        self.b.variable(ty, None, StorageClass::Function, None)
    }

    /// Declares a function-local `int` variable.
    pub fn local_int(&mut self) -> Word {
        let ty = self.fn_int_ptr;
        self.b.variable(ty, None, StorageClass::Function, None)
    }

    /// Stores into a component of a local aggregate through a constant index.
    pub fn store_local(&mut self, var: Word, component: u32, value: Word) {
        let selector = self.const_i(component);
        let ptr = self
            .b
            .access_chain(self.fn_elem_ptr, None, var, vec![selector])
            .unwrap();
        self.b.store(ptr, value, None, vec![]).unwrap();
    }

    /// Loads a component of a local aggregate through an arbitrary index id.
    pub fn load_local_at(&mut self, var: Word, selector: Word) -> Word {
        let ptr = self
            .b
            .access_chain(self.fn_elem_ptr, None, var, vec![selector])
            .unwrap();
        self.b.load(self.float, None, ptr, None, vec![]).unwrap()
    }

    /// Closes the function and assembles the module.
    pub fn finish(mut self) -> Vec<u32> {
        self.b.ret().unwrap();
        self.b.end_function().unwrap();
        let mut interface = self.inputs.clone();
        interface.push(self.output);
        self.b
            .entry_point(ExecutionModel::Fragment, self.main, "main", interface);
        self.b
            .execution_mode(self.main, ExecutionMode::OriginUpperLeft, vec![]);
        self.b.module().assemble()
    }
}

/// Parses and runs the pass pipeline, returning the prepared HIR.
#[allow(dead_code)]
pub fn prepare(words: &[u32]) -> gcnc_ir::hir::Program {
    let mut program = gcnc_spirv::parse_words(words, "main").expect("SPIR-V should load");
    gcnc_opt::Pipeline::standard()
        .run(&mut program)
        .expect("pass pipeline should succeed");
    program
}

/// Full pipeline: SPIR-V words in, GCN words out.
#[allow(dead_code)]
pub fn compile(words: &[u32]) -> Result<Vec<u32>, String> {
    let mut program = gcnc_spirv::parse_words(words, "main").map_err(|e| e.to_string())?;
    gcnc_opt::Pipeline::standard()
        .run(&mut program)
        .map_err(|e| e.to_string())?;
    gcnc_codegen::compile(&program).map_err(|e| e.to_string())
}

// --- word-pattern helpers ---

/// `s_endpgm`.
#[allow(dead_code)]
pub const S_ENDPGM: u32 = (0b1_0111_1111 << 23) | (1 << 16);

/// Export word 0 for `enable=0xF, target=0, done, vm`.
#[allow(dead_code)]
pub const EXP_DONE_TARGET0: u32 = (0b11_0001 << 26) | 0xF | (1 << 11) | (1 << 12);

#[allow(dead_code)]
pub fn is_vintrp(word: u32) -> bool {
    word >> 26 == 0b11_0101
}

#[allow(dead_code)]
pub fn vintrp_phase(word: u32) -> u32 {
    (word >> 16) & 0x3
}

#[allow(dead_code)]
pub fn vintrp_attr_chan(word: u32) -> (u32, u32) {
    ((word >> 10) & 0x3F, (word >> 8) & 0x3)
}

#[allow(dead_code)]
pub fn is_v_mov(word: u32) -> bool {
    word >> 25 == 0b011_1111 && (word >> 9) & 0xFF == 1
}

#[allow(dead_code)]
pub fn is_v_cmp_lt(word: u32) -> bool {
    word >> 25 == 0b011_1110 && (word >> 17) & 0xFF == 0x41
}

#[allow(dead_code)]
pub fn is_sop2(word: u32, opcode: u32) -> bool {
    word >> 30 == 0b10 && (word >> 23) & 0x7F == opcode
}

#[allow(dead_code)]
pub fn is_s_mov_b64(word: u32) -> bool {
    word >> 23 == 0b1_0111_1101 && (word >> 8) & 0xFF == 1
}
