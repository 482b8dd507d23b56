//! Bytecode opcodes for the template VM
//!
//! The VM is stack based. Locals live in per-function scopes addressed by
//! [`LocalRef`], which makes closures (macros, call blocks, recursive loops)
//! see the latest value of an outer variable at call time.

use std::fmt;

use core_types::{BinOp, CmpOp, UnaryOp};
use serde::{Deserialize, Serialize};

/// Index of an instruction inside a chunk
pub type Label = u32;

/// Address of a local slot: `depth` scopes up from the running function,
/// then `slot` inside that scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalRef {
    /// Number of enclosing scopes to walk up
    pub depth: u16,
    /// Slot inside the target scope
    pub slot: u16,
}

impl LocalRef {
    /// Slot in the running function's own scope
    pub fn local(slot: u16) -> Self {
        Self { depth: 0, slot }
    }
}

impl fmt::Display for LocalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth == 0 {
            write!(f, "${}", self.slot)
        } else {
            write!(f, "${}^{}", self.slot, self.depth)
        }
    }
}

/// Argument layout of a call.
///
/// Operands are pushed in this order: positional arguments, keyword values
/// (names listed here), then the optional `*args` and `**kwargs` values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallShape {
    /// Number of positional arguments
    pub args: u16,
    /// Keyword argument names, in push order
    pub kwargs: Vec<String>,
    /// A `*args` value follows the keywords
    pub dyn_args: bool,
    /// A `**kwargs` value follows everything else
    pub dyn_kwargs: bool,
}

impl CallShape {
    /// Shape with only positional arguments
    pub fn positional(args: u16) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    /// Number of stack operands the call consumes besides its receiver
    pub fn operand_count(&self) -> usize {
        self.args as usize + self.kwargs.len() + self.dyn_args as usize + self.dyn_kwargs as usize
    }
}

/// How output of an instruction is escaped.
///
/// Escaping is decided when the code is generated, from the autoescape
/// setting in effect at that point of the template. Only when an
/// `{% autoescape %}` value is not a constant is the decision left to the
/// runtime setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Escape {
    /// Never escape
    Off,
    /// Always escape
    On,
    /// Follow the runtime autoescape setting
    Runtime,
}

impl fmt::Display for Escape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Escape::Off => "off",
            Escape::On => "on",
            Escape::Runtime => "runtime",
        })
    }
}

/// Bytecode opcodes for template execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    // Constants and stack
    /// Push constant from the chunk's constant pool
    LoadConst(u32),
    /// Push an undefined value built by the environment
    LoadUndefined {
        /// Name that was missing
        name: Option<String>,
        /// Explicit message
        hint: Option<String>,
    },
    /// Discard the top of stack
    Pop,
    /// Duplicate the top of stack
    Dup,
    /// Swap the two topmost values
    Swap,

    // Locals
    /// Push a local known to be bound
    LoadLocal(LocalRef),
    /// Push a local, or an undefined named `name` if the slot is unbound
    LoadName {
        /// Slot to read
        local: LocalRef,
        /// Template-level name for the undefined
        name: String,
    },
    /// Pop into a local slot
    StoreLocal(LocalRef),
    /// Bind a local from the context; unbound if the context lacks the name
    ResolveLocal {
        /// Slot to bind
        local: LocalRef,
        /// Context name
        name: String,
    },
    /// Copy a slot (bound or not) into another
    CopyLocal {
        /// Source slot
        from: LocalRef,
        /// Target slot
        to: LocalRef,
    },
    /// Unbind a slot
    ClearLocal(LocalRef),
    /// Jump if the slot is bound
    JumpIfBound {
        /// Slot to test
        local: LocalRef,
        /// Jump target
        target: Label,
    },
    /// Push a map of the named slots that are bound
    BuildLocals(Vec<(String, LocalRef)>),

    // Context
    /// Copy a local into the context's template variables
    StoreContextVar {
        /// Variable name
        name: String,
        /// Slot holding the value
        local: LocalRef,
    },
    /// Mark a name as exported from the template module
    Export(String),
    /// Remove a name from the exported set
    Unexport(String),
    /// Pop a value and a namespace (top); assign the attribute on the namespace
    SetNamespaceAttr(String),

    // Expressions
    /// Attribute lookup on the top of stack
    GetAttr(String),
    /// Pop key and object, push `object[key]`
    GetItem,
    /// Pop step, stop, start and object, push the slice
    Slice,
    /// Binary arithmetic operator
    BinaryOp(BinOp),
    /// Unary operator
    UnaryOp(UnaryOp),
    /// Pop right and left operands, push the comparison result
    Compare(CmpOp),
    /// Like `Compare` but leaves the right operand below the result
    CompareChain(CmpOp),
    /// Pop n values and join them into a string, markup aware when escaping
    Concat(u16, Escape),
    /// Build a list from the top n values
    BuildList(u16),
    /// Build a tuple from the top n values
    BuildTuple(u16),
    /// Build a map from the top n key/value pairs
    BuildMap(u16),
    /// Unpack an iterable of exactly n items; the first item ends on top
    UnpackSequence(u16),
    /// Wrap the top of stack as markup
    MarkSafe,
    /// Wrap the top of stack as markup if escaping
    MarkSafeIfAutoescape(Escape),
    /// Call a value
    Call(CallShape),
    /// Call a method on the receiver below the arguments
    CallMethod {
        /// Method name
        name: String,
        /// Arguments
        shape: CallShape,
    },
    /// Apply a filter; the filtered value sits below the arguments
    CallFilter {
        /// Filter name
        name: String,
        /// Arguments after the filtered value
        shape: CallShape,
    },
    /// Apply a test; the tested value sits below the arguments
    CallTest {
        /// Test name
        name: String,
        /// Arguments after the tested value
        shape: CallShape,
    },
    /// Push an attribute provided by an extension
    ExtensionAttribute {
        /// Extension identifier
        extension: String,
        /// Attribute name
        name: String,
    },

    // Control flow
    /// Unconditional jump
    Jump(Label),
    /// Pop and jump if falsy
    JumpIfFalse(Label),
    /// Pop and jump if truthy
    JumpIfTrue(Label),
    /// Jump if falsy leaving the value, otherwise pop
    JumpIfFalseOrPop(Label),
    /// Jump if truthy leaving the value, otherwise pop
    JumpIfTrueOrPop(Label),
    /// Pop an iterable, push a loop context over it
    PushLoop {
        /// The loop is the body of a recursive loop function
        recursive: bool,
    },
    /// Advance the loop context on top of stack and push the next item, or
    /// jump to the target leaving the loop context in place
    Iterate(Label),
    /// Pop the loop context and push whether it produced no items
    LoopWasEmpty,
    /// Pop an iterable and push a filter state used by `FilterNext`
    StartFilter,
    /// Push the next candidate item, or replace the state by the kept items
    /// and jump
    FilterNext(Label),
    /// Pop a test result and a candidate; keep the candidate if the test passed
    FilterKeep,

    // Output
    /// Emit a constant string unchanged
    EmitRaw(u32),
    /// Apply the environment's finalize callable to the top of stack
    Finalize,
    /// Pop a value and emit its string form, escaped per the mode
    Emit(Escape),
    /// Start capturing output into a buffer
    BeginCapture,
    /// Stop capturing and push the buffer, as markup if escaping
    EndCapture(Escape),
    /// Drop the innermost capture buffer
    DiscardCapture,
    /// Pop a value and switch autoescaping to its truthiness
    PushAutoescape,
    /// Restore the autoescape setting saved by the matching push
    PopAutoescape,
    /// Pop a vars map and a locals map, switch to a derived context
    PushOverlay,
    /// Return to the context active before the matching overlay
    PopOverlay,

    // Functions
    /// Push a callable for the chunk at the given index, closing over the
    /// running scope
    MakeClosure(u32),
    /// Push a reference to the template's blocks (`self`)
    MakeTemplateRef,
    /// Push the parent level of the running block (`super`)
    MakeSuper,
    /// Return from the running function
    Return,
    /// Pop a value and return it to the caller
    ReturnValue,

    // Templates
    /// Pop a template name and register it as the parent template
    Extends,
    /// Jump if a parent template has been registered
    JumpIfParentSet(Label),
    /// If a parent template is registered, continue in its root function
    RenderParent,
    /// Render the innermost override of a block
    RenderBlock {
        /// Block name
        name: String,
        /// Pop a locals map and render in a derived context
        scoped: bool,
        /// Fail unless a child template overrides the block
        required: bool,
    },
    /// Pop a template name (and a locals map if with context) and render it
    Include {
        /// Render with the current context's variables
        with_context: bool,
        /// Swallow template-not-found errors
        ignore_missing: bool,
    },
    /// Pop a template name (and a locals map if with context) and push its module
    Import {
        /// Evaluate the module with the current context's variables
        with_context: bool,
    },
    /// Look up an exported name on the module on top of stack
    ImportName {
        /// Exported name
        name: String,
        /// "line N in 'x'" used when the name is missing
        position: String,
    },
}

impl Opcode {
    /// Target of a jumping instruction
    pub fn jump_target(&self) -> Option<Label> {
        match self {
            Opcode::Jump(t)
            | Opcode::JumpIfFalse(t)
            | Opcode::JumpIfTrue(t)
            | Opcode::JumpIfFalseOrPop(t)
            | Opcode::JumpIfTrueOrPop(t)
            | Opcode::Iterate(t)
            | Opcode::FilterNext(t)
            | Opcode::JumpIfParentSet(t)
            | Opcode::JumpIfBound { target: t, .. } => Some(*t),
            _ => None,
        }
    }

    /// Mutable access to the jump target
    pub fn jump_target_mut(&mut self) -> Option<&mut Label> {
        match self {
            Opcode::Jump(t)
            | Opcode::JumpIfFalse(t)
            | Opcode::JumpIfTrue(t)
            | Opcode::JumpIfFalseOrPop(t)
            | Opcode::JumpIfTrueOrPop(t)
            | Opcode::Iterate(t)
            | Opcode::FilterNext(t)
            | Opcode::JumpIfParentSet(t)
            | Opcode::JumpIfBound { target: t, .. } => Some(t),
            _ => None,
        }
    }

    /// True if execution never falls through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(self, Opcode::Jump(_) | Opcode::Return | Opcode::ReturnValue)
    }

    /// True if the instruction produces output
    pub fn is_output(&self) -> bool {
        matches!(
            self,
            Opcode::EmitRaw(_) | Opcode::Emit(_) | Opcode::RenderBlock { .. } | Opcode::Include { .. }
        )
    }
}

fn shape_suffix(f: &mut fmt::Formatter<'_>, shape: &CallShape) -> fmt::Result {
    write!(f, " argc={}", shape.args)?;
    if !shape.kwargs.is_empty() {
        write!(f, " kw=[{}]", shape.kwargs.join(","))?;
    }
    if shape.dyn_args {
        f.write_str(" *args")?;
    }
    if shape.dyn_kwargs {
        f.write_str(" **kwargs")?;
    }
    Ok(())
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::LoadConst(i) => write!(f, "LOAD_CONST {}", i),
            Opcode::LoadUndefined { name, hint } => match (name, hint) {
                (_, Some(hint)) => write!(f, "LOAD_UNDEFINED hint={:?}", hint),
                (Some(name), None) => write!(f, "LOAD_UNDEFINED {}", name),
                (None, None) => f.write_str("LOAD_UNDEFINED"),
            },
            Opcode::Pop => f.write_str("POP"),
            Opcode::Dup => f.write_str("DUP"),
            Opcode::Swap => f.write_str("SWAP"),
            Opcode::LoadLocal(l) => write!(f, "LOAD_LOCAL {}", l),
            Opcode::LoadName { local, name } => write!(f, "LOAD_NAME {} ({})", local, name),
            Opcode::StoreLocal(l) => write!(f, "STORE_LOCAL {}", l),
            Opcode::ResolveLocal { local, name } => write!(f, "RESOLVE {} ({})", local, name),
            Opcode::CopyLocal { from, to } => write!(f, "COPY_LOCAL {} -> {}", from, to),
            Opcode::ClearLocal(l) => write!(f, "CLEAR_LOCAL {}", l),
            Opcode::JumpIfBound { local, target } => write!(f, "JUMP_IF_BOUND {} -> {}", local, target),
            Opcode::BuildLocals(entries) => {
                f.write_str("BUILD_LOCALS")?;
                for (name, local) in entries {
                    write!(f, " {}={}", name, local)?;
                }
                Ok(())
            }
            Opcode::StoreContextVar { name, local } => write!(f, "STORE_CONTEXT {} <- {}", name, local),
            Opcode::Export(name) => write!(f, "EXPORT {}", name),
            Opcode::Unexport(name) => write!(f, "UNEXPORT {}", name),
            Opcode::SetNamespaceAttr(name) => write!(f, "SET_NS_ATTR {}", name),
            Opcode::GetAttr(name) => write!(f, "GET_ATTR {}", name),
            Opcode::GetItem => f.write_str("GET_ITEM"),
            Opcode::Slice => f.write_str("SLICE"),
            Opcode::BinaryOp(op) => write!(f, "BINARY {}", op.symbol()),
            Opcode::UnaryOp(op) => write!(f, "UNARY {:?}", op),
            Opcode::Compare(op) => write!(f, "COMPARE {}", op.symbol()),
            Opcode::CompareChain(op) => write!(f, "COMPARE_CHAIN {}", op.symbol()),
            Opcode::Concat(n, esc) => write!(f, "CONCAT {} escape={}", n, esc),
            Opcode::BuildList(n) => write!(f, "BUILD_LIST {}", n),
            Opcode::BuildTuple(n) => write!(f, "BUILD_TUPLE {}", n),
            Opcode::BuildMap(n) => write!(f, "BUILD_MAP {}", n),
            Opcode::UnpackSequence(n) => write!(f, "UNPACK {}", n),
            Opcode::MarkSafe => f.write_str("MARK_SAFE"),
            Opcode::MarkSafeIfAutoescape(esc) => write!(f, "MARK_SAFE_IF_AUTOESCAPE {}", esc),
            Opcode::Call(shape) => {
                f.write_str("CALL")?;
                shape_suffix(f, shape)
            }
            Opcode::CallMethod { name, shape } => {
                write!(f, "CALL_METHOD {}", name)?;
                shape_suffix(f, shape)
            }
            Opcode::CallFilter { name, shape } => {
                write!(f, "FILTER {}", name)?;
                shape_suffix(f, shape)
            }
            Opcode::CallTest { name, shape } => {
                write!(f, "TEST {}", name)?;
                shape_suffix(f, shape)
            }
            Opcode::ExtensionAttribute { extension, name } => write!(f, "EXT_ATTR {}.{}", extension, name),
            Opcode::Jump(t) => write!(f, "JUMP {}", t),
            Opcode::JumpIfFalse(t) => write!(f, "JUMP_IF_FALSE {}", t),
            Opcode::JumpIfTrue(t) => write!(f, "JUMP_IF_TRUE {}", t),
            Opcode::JumpIfFalseOrPop(t) => write!(f, "JUMP_IF_FALSE_OR_POP {}", t),
            Opcode::JumpIfTrueOrPop(t) => write!(f, "JUMP_IF_TRUE_OR_POP {}", t),
            Opcode::PushLoop { recursive } => {
                f.write_str("PUSH_LOOP")?;
                if *recursive {
                    f.write_str(" recursive")?;
                }
                Ok(())
            }
            Opcode::Iterate(t) => write!(f, "ITERATE {}", t),
            Opcode::LoopWasEmpty => f.write_str("LOOP_WAS_EMPTY"),
            Opcode::StartFilter => f.write_str("START_FILTER"),
            Opcode::FilterNext(t) => write!(f, "FILTER_NEXT {}", t),
            Opcode::FilterKeep => f.write_str("FILTER_KEEP"),
            Opcode::EmitRaw(i) => write!(f, "EMIT_RAW {}", i),
            Opcode::Finalize => f.write_str("FINALIZE"),
            Opcode::Emit(esc) => write!(f, "EMIT escape={}", esc),
            Opcode::BeginCapture => f.write_str("BEGIN_CAPTURE"),
            Opcode::EndCapture(esc) => write!(f, "END_CAPTURE escape={}", esc),
            Opcode::DiscardCapture => f.write_str("DISCARD_CAPTURE"),
            Opcode::PushAutoescape => f.write_str("PUSH_AUTOESCAPE"),
            Opcode::PopAutoescape => f.write_str("POP_AUTOESCAPE"),
            Opcode::PushOverlay => f.write_str("PUSH_OVERLAY"),
            Opcode::PopOverlay => f.write_str("POP_OVERLAY"),
            Opcode::MakeClosure(i) => write!(f, "MAKE_CLOSURE {}", i),
            Opcode::MakeTemplateRef => f.write_str("MAKE_TEMPLATE_REF"),
            Opcode::MakeSuper => f.write_str("MAKE_SUPER"),
            Opcode::Return => f.write_str("RETURN"),
            Opcode::ReturnValue => f.write_str("RETURN_VALUE"),
            Opcode::Extends => f.write_str("EXTENDS"),
            Opcode::JumpIfParentSet(t) => write!(f, "JUMP_IF_PARENT_SET {}", t),
            Opcode::RenderParent => f.write_str("RENDER_PARENT"),
            Opcode::RenderBlock { name, scoped, required } => {
                write!(f, "RENDER_BLOCK {}", name)?;
                if *scoped {
                    f.write_str(" scoped")?;
                }
                if *required {
                    f.write_str(" required")?;
                }
                Ok(())
            }
            Opcode::Include {
                with_context,
                ignore_missing,
            } => {
                f.write_str("INCLUDE")?;
                if *with_context {
                    f.write_str(" with_context")?;
                }
                if *ignore_missing {
                    f.write_str(" ignore_missing")?;
                }
                Ok(())
            }
            Opcode::Import { with_context } => {
                f.write_str("IMPORT")?;
                if *with_context {
                    f.write_str(" with_context")?;
                }
                Ok(())
            }
            Opcode::ImportName { name, .. } => write!(f, "IMPORT_NAME {}", name),
        }
    }
}
