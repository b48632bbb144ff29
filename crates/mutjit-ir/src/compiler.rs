//! Compiler from IR to WebAssembly object code.
//!
//! Every compiled module imports the image-wide linear memory and indirect
//! call table, one immutable `got.<symbol>` global per undefined callee and
//! one mutable `env.<cell>` global per indirect call cell. Defined functions
//! are all exported by name. Basic blocks are lowered to a `loop` wrapping a
//! `br_table` dispatcher on a program-counter local.

use crate::instruction::{Instruction, Opcode, Operand};
use crate::naming;
use crate::program::{Function, Program, Signature};
use mutjit_core::{Error, Result};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use wasm_encoder::*;

/// Output of compiling one IR module
#[derive(Debug, Clone)]
pub struct CompiledObject {
    pub module_id: String,
    pub bytes: Vec<u8>,
    /// Exported function symbols, in definition order
    pub defined: Vec<String>,
    /// GOT entries with the signature the object calls them with
    pub undefined: Vec<(String, Signature)>,
    /// Indirect call cells the object reads
    pub cells: Vec<String>,
    pub constructors: Vec<String>,
    pub instrumented: bool,
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Insert enter/leave hooks into every function
    pub instrument: bool,
    /// Minimum size of the imported linear memory (64 KiB pages)
    pub min_memory_pages: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            instrument: false,
            min_memory_pages: 1,
        }
    }
}

pub struct Compiler {
    config: CompilerConfig,
}

/// Function types in the order they are first requested
#[derive(Default)]
struct TypeRegistry {
    entries: Vec<(usize, bool)>,
    indices: HashMap<(usize, bool), u32>,
}

impl TypeRegistry {
    fn index(&mut self, params: usize, has_result: bool) -> u32 {
        let key = (params, has_result);
        if let Some(index) = self.indices.get(&key) {
            return *index;
        }
        let index = self.entries.len() as u32;
        self.entries.push(key);
        self.indices.insert(key, index);
        index
    }

    fn signature(&mut self, sig: Signature) -> u32 {
        self.index(sig.num_params, sig.returns_value())
    }
}

/// Module-wide index spaces
struct ModuleContext<'a> {
    program: &'a Program,
    globals: HashMap<String, u32>,
    functions: HashMap<&'a str, u32>,
    offset_global: Option<u32>,
}

const ENTER_HOOK: u32 = 0;
const LEAVE_HOOK: u32 = 1;

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn instrumented() -> Self {
        Self::new(CompilerConfig {
            instrument: true,
            ..Default::default()
        })
    }

    pub fn compile(&self, program: &Program, module_id: &str) -> Result<CompiledObject> {
        let instrument = self.config.instrument;
        let mut types = TypeRegistry::default();

        let mut undefined = Vec::new();
        for name in program.undefined_symbols() {
            let sig = program.signature_of(&name).ok_or_else(|| {
                Error::Compile(format!("call to undeclared function '{}'", name))
            })?;
            undefined.push((name, sig));
        }

        let cells: Vec<String> = program
            .functions
            .iter()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| b.instructions.iter())
            .filter(|i| i.opcode == Opcode::CallIndirect)
            .filter_map(|i| i.callee())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut globals = HashMap::new();
        for (i, name) in undefined.iter().map(|(n, _)| n).chain(cells.iter()).enumerate() {
            globals.insert(name.clone(), i as u32);
        }
        let offset_global = instrument.then_some((undefined.len() + cells.len()) as u32);

        let hook_count = if instrument { 2 } else { 0 };
        let functions = program
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.as_str(), hook_count + i as u32))
            .collect();

        let hook_type = instrument.then(|| types.index(1, false));
        let function_types: Vec<u32> = program
            .functions
            .iter()
            .map(|f| types.signature(f.signature()))
            .collect();

        let ctx = ModuleContext {
            program,
            globals,
            functions,
            offset_global,
        };

        let mut code = CodeSection::new();
        for (index, func) in program.functions.iter().enumerate() {
            let body = self.compile_function(&ctx, &mut types, index as u32, func)?;
            code.function(&body);
        }

        let mut module = Module::new();

        let mut type_section = TypeSection::new();
        for &(params, has_result) in &types.entries {
            let results = if has_result { vec![ValType::I32] } else { vec![] };
            type_section.function(vec![ValType::I32; params], results);
        }
        module.section(&type_section);

        let mut imports = ImportSection::new();
        imports.import(
            naming::ENV_MODULE,
            naming::MEMORY_SYMBOL,
            EntityType::Memory(MemoryType {
                minimum: self.config.min_memory_pages as u64,
                maximum: None,
                memory64: false,
                shared: false,
            }),
        );
        imports.import(
            naming::ENV_MODULE,
            naming::TABLE_SYMBOL,
            EntityType::Table(TableType {
                element_type: RefType::FUNCREF,
                minimum: 0,
                maximum: None,
            }),
        );
        for (name, _) in &undefined {
            imports.import(
                naming::GOT_MODULE,
                name,
                EntityType::Global(GlobalType {
                    val_type: ValType::I32,
                    mutable: false,
                }),
            );
        }
        for cell in &cells {
            imports.import(
                naming::ENV_MODULE,
                cell,
                EntityType::Global(GlobalType {
                    val_type: ValType::I32,
                    mutable: true,
                }),
            );
        }
        if let Some(hook_type) = hook_type {
            imports.import(
                naming::ENV_MODULE,
                naming::ENTER_FUNCTION_SYMBOL,
                EntityType::Function(hook_type),
            );
            imports.import(
                naming::ENV_MODULE,
                naming::LEAVE_FUNCTION_SYMBOL,
                EntityType::Function(hook_type),
            );
            imports.import(
                naming::ENV_MODULE,
                &naming::function_index_offset_symbol(module_id),
                EntityType::Global(GlobalType {
                    val_type: ValType::I32,
                    mutable: false,
                }),
            );
        }
        module.section(&imports);

        let mut function_section = FunctionSection::new();
        for type_index in &function_types {
            function_section.function(*type_index);
        }
        module.section(&function_section);

        let mut exports = ExportSection::new();
        for (i, func) in program.functions.iter().enumerate() {
            exports.export(&func.name, ExportKind::Func, hook_count + i as u32);
        }
        module.section(&exports);

        module.section(&code);

        tracing::trace!(
            module_id,
            functions = program.functions.len(),
            got = undefined.len(),
            cells = cells.len(),
            instrument,
            "compiled module"
        );

        Ok(CompiledObject {
            module_id: module_id.to_string(),
            bytes: module.finish(),
            defined: program.functions.iter().map(|f| f.name.clone()).collect(),
            undefined,
            cells,
            constructors: program.constructors.clone(),
            instrumented: instrument,
        })
    }

    fn compile_function(
        &self,
        ctx: &ModuleContext<'_>,
        types: &mut TypeRegistry,
        index: u32,
        func: &Function,
    ) -> Result<wasm_encoder::Function> {
        use wasm_encoder::Instruction as WI;

        let registers = func.register_count();
        let pc = registers as u32;
        let extra_locals = (registers - func.num_params) as u32 + 1;
        let mut wasm_func = wasm_encoder::Function::new(vec![(extra_locals, ValType::I32)]);

        self.emit_hook(&mut wasm_func, ctx, index, ENTER_HOOK);

        let n = func.blocks.len() as u32;
        wasm_func.instruction(&WI::Loop(BlockType::Empty));
        for _ in 0..n {
            wasm_func.instruction(&WI::Block(BlockType::Empty));
        }
        wasm_func.instruction(&WI::LocalGet(pc));
        let targets: Vec<u32> = (0..n).collect();
        wasm_func.instruction(&WI::BrTable(Cow::Owned(targets), n - 1));

        for (block_idx, block) in func.blocks.iter().enumerate() {
            wasm_func.instruction(&WI::End);
            let loop_depth = n - 1 - block_idx as u32;
            for inst in &block.instructions {
                self.compile_instruction(&mut wasm_func, ctx, types, index, pc, loop_depth, inst)
                    .map_err(|e| match e {
                        Error::Compile(msg) => Error::Compile(format!(
                            "{} block {}: {}",
                            func.name, block_idx, msg
                        )),
                        other => other,
                    })?;
            }
        }

        wasm_func.instruction(&WI::End);
        wasm_func.instruction(&WI::Unreachable);
        wasm_func.instruction(&WI::End);
        Ok(wasm_func)
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_instruction(
        &self,
        wasm_func: &mut wasm_encoder::Function,
        ctx: &ModuleContext<'_>,
        types: &mut TypeRegistry,
        index: u32,
        pc: u32,
        loop_depth: u32,
        inst: &Instruction,
    ) -> Result<()> {
        use wasm_encoder::Instruction as WI;

        let mem = MemArg {
            offset: 0,
            align: 2,
            memory_index: 0,
        };

        match inst.opcode {
            op if op.is_binary() => {
                self.load_operands(wasm_func, &inst.operands)?;
                wasm_func.instruction(&match op {
                    Opcode::Add => WI::I32Add,
                    Opcode::Sub => WI::I32Sub,
                    Opcode::Mul => WI::I32Mul,
                    Opcode::Div => WI::I32DivS,
                    Opcode::Mod => WI::I32RemS,
                    Opcode::Eq => WI::I32Eq,
                    Opcode::Ne => WI::I32Ne,
                    Opcode::Lt => WI::I32LtS,
                    Opcode::Le => WI::I32LeS,
                    Opcode::Gt => WI::I32GtS,
                    Opcode::Ge => WI::I32GeS,
                    Opcode::And => WI::I32And,
                    Opcode::Or => WI::I32Or,
                    _ => WI::I32Xor,
                });
                self.store_result(wasm_func, inst);
            }
            Opcode::Neg => {
                wasm_func.instruction(&WI::I32Const(0));
                self.load_operands(wasm_func, &inst.operands)?;
                wasm_func.instruction(&WI::I32Sub);
                self.store_result(wasm_func, inst);
            }
            Opcode::Not => {
                self.load_operands(wasm_func, &inst.operands)?;
                wasm_func.instruction(&WI::I32Eqz);
                self.store_result(wasm_func, inst);
            }
            Opcode::Copy | Opcode::LoadConst => {
                self.load_operands(wasm_func, &inst.operands)?;
                self.store_result(wasm_func, inst);
            }
            Opcode::Load => {
                self.load_operands(wasm_func, &inst.operands)?;
                wasm_func.instruction(&WI::I32Load(mem));
                self.store_result(wasm_func, inst);
            }
            Opcode::Store => {
                self.load_operands(wasm_func, &inst.operands)?;
                wasm_func.instruction(&WI::I32Store(mem));
            }

            Opcode::Branch => {
                let target = inst.successors()[0];
                self.jump(wasm_func, pc, target, loop_depth);
            }
            Opcode::BranchIf => {
                let targets = inst.successors();
                self.load_operands(wasm_func, &inst.operands[..1])?;
                wasm_func.instruction(&WI::If(BlockType::Empty));
                self.jump(wasm_func, pc, targets[0], loop_depth + 1);
                wasm_func.instruction(&WI::Else);
                self.jump(wasm_func, pc, targets[1], loop_depth + 1);
                wasm_func.instruction(&WI::End);
            }

            Opcode::Call => {
                let callee = inst
                    .callee()
                    .ok_or_else(|| Error::Compile("call without callee".to_string()))?;
                self.load_operands(wasm_func, inst.call_arguments())?;
                let sig = ctx.program.signature_of(callee).ok_or_else(|| {
                    Error::Compile(format!("call to undeclared function '{}'", callee))
                })?;
                if let Some(func_idx) = ctx.functions.get(callee) {
                    wasm_func.instruction(&WI::Call(*func_idx));
                } else {
                    let got = ctx.globals.get(callee).ok_or_else(|| {
                        Error::Compile(format!("no GOT entry for '{}'", callee))
                    })?;
                    wasm_func.instruction(&WI::GlobalGet(*got));
                    wasm_func.instruction(&WI::CallIndirect {
                        ty: types.signature(sig),
                        table: 0,
                    });
                }
                if sig.returns_value() {
                    self.store_result(wasm_func, inst);
                }
            }
            Opcode::CallIndirect => {
                let cell = inst
                    .callee()
                    .ok_or_else(|| Error::Compile("indirect call without cell".to_string()))?;
                self.load_operands(wasm_func, inst.call_arguments())?;
                let cell_global = ctx.globals.get(cell).ok_or_else(|| {
                    Error::Compile(format!("no cell import for '{}'", cell))
                })?;
                wasm_func.instruction(&WI::GlobalGet(*cell_global));
                wasm_func.instruction(&WI::CallIndirect {
                    ty: types.index(inst.call_arguments().len(), inst.dest.is_some()),
                    table: 0,
                });
                if let Some(dest) = inst.dest {
                    wasm_func.instruction(&WI::LocalSet(dest.0 as u32));
                }
            }

            Opcode::Return => {
                self.load_operands(wasm_func, &inst.operands)?;
                self.emit_hook(wasm_func, ctx, index, LEAVE_HOOK);
                wasm_func.instruction(&WI::Return);
            }
            Opcode::Unreachable => {
                wasm_func.instruction(&WI::Unreachable);
            }
            op => {
                return Err(Error::Compile(format!("unsupported opcode {:?}", op)));
            }
        }

        Ok(())
    }

    fn load_operands(
        &self,
        wasm_func: &mut wasm_encoder::Function,
        operands: &[Operand],
    ) -> Result<()> {
        use wasm_encoder::Instruction as WI;

        for operand in operands {
            match operand {
                Operand::Register(reg) => {
                    wasm_func.instruction(&WI::LocalGet(reg.0 as u32));
                }
                Operand::Immediate(value) => {
                    wasm_func.instruction(&WI::I32Const(value.as_i32()));
                }
                other => {
                    return Err(Error::Compile(format!("{:?} is not a value", other)));
                }
            }
        }

        Ok(())
    }

    /// Pop the value on top of the stack into the destination, or drop it
    fn store_result(&self, wasm_func: &mut wasm_encoder::Function, inst: &Instruction) {
        use wasm_encoder::Instruction as WI;

        match inst.dest {
            Some(dest) => wasm_func.instruction(&WI::LocalSet(dest.0 as u32)),
            None => wasm_func.instruction(&WI::Drop),
        };
    }

    /// Set the program counter and re-enter the dispatch loop
    fn jump(&self, wasm_func: &mut wasm_encoder::Function, pc: u32, target: u32, depth: u32) {
        use wasm_encoder::Instruction as WI;

        wasm_func.instruction(&WI::I32Const(target as i32));
        wasm_func.instruction(&WI::LocalSet(pc));
        wasm_func.instruction(&WI::Br(depth));
    }

    fn emit_hook(
        &self,
        wasm_func: &mut wasm_encoder::Function,
        ctx: &ModuleContext<'_>,
        index: u32,
        hook: u32,
    ) {
        use wasm_encoder::Instruction as WI;

        if let Some(offset) = ctx.offset_global {
            wasm_func.instruction(&WI::I32Const(index as i32));
            wasm_func.instruction(&WI::GlobalGet(offset));
            wasm_func.instruction(&WI::I32Add);
            wasm_func.instruction(&WI::Call(hook));
        }
    }
}
