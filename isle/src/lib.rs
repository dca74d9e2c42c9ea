//! A small domain-specific language for writing instruction-selection
//! rules as declarative pattern-matching term rewrites, and the toolchain
//! that turns a rule set into a runnable [`Dispatcher`]:
//!
//! ```text
//! source text -> lexer -> parser -> ast -> sema -> trie -> codegen
//! ```
//!
//! Each stage is its own module; [`compile_str`] runs the whole pipeline.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod sema;
pub mod trie;

pub use codegen::{DispatchEnv, Dispatcher};
pub use error::{IsleError, Pos, Result};
pub use sema::{RuleSet, TermEnv, TermId, TypeEnv, TypeId};
pub use trie::{CompiledRules, Disc};

/// Runs the full pipeline over `src` and returns a ready-to-use
/// [`Dispatcher`].
pub fn compile_str(src: &str, file: &'static str) -> Result<Dispatcher> {
    let defs = parser::parse(src, file)?;
    let rule_set = sema::analyze(&defs)?;
    let mut control = retarget_control::ControlPlane::default();
    let compiled = trie::compile(&rule_set, &mut control)?;
    Ok(Dispatcher::new(compiled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_pipeline_compiles() {
        let src = "
            (type Imm primitive)
            (decl iadd (Imm Imm) Imm)
            (decl iadd_imm (Imm Imm) Imm)
            (rule (iadd x 1) (iadd_imm x 1))
        ";
        compile_str(src, "test").unwrap();
    }
}
