use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use lumen_core::{codes, Diagnostic};
use lumen_refs::ReferenceProjection;

use crate::{Compilation, CompileRequest, Compiler, CompilerFault, EmittedImage, TypedProgram};

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_contained<T>(f: impl FnOnce() -> Result<T, CompilerFault>) -> Result<T, CompilerFault> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CompilerFault::Panicked(panic_message(payload))),
    }
}

fn fault_diagnostic(fault: &CompilerFault) -> Diagnostic {
    Diagnostic::error(codes::COMPILER_FAULT, fault.to_string())
}

/// Invoke `compiler`, converting faults and panics into a failed [`Compilation`] and dropping
/// diagnostics whose codes are suppressed for this request.
pub fn compile_guarded(compiler: &dyn Compiler, request: &CompileRequest<'_>) -> Compilation {
    let started = Instant::now();
    let mut compilation = match run_contained(|| compiler.compile(request)) {
        Ok(compilation) => compilation,
        Err(fault) => {
            tracing::error!(
                target = "lumen.compiler",
                units = request.units.len(),
                error = %fault,
                "compiler invocation failed"
            );
            Compilation {
                program: TypedProgram::default(),
                diagnostics: vec![fault_diagnostic(&fault)],
            }
        }
    };

    let suppressed = &request.options.suppressed_codes;
    if !suppressed.is_empty() {
        compilation
            .diagnostics
            .retain(|diag| !suppressed.contains(&diag.code));
    }

    tracing::debug!(
        target = "lumen.compiler",
        units = request.units.len(),
        diagnostics = compilation.diagnostics.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "compiled"
    );
    compilation
}

/// Run code generation, converting faults and panics into a diagnostic.
pub fn emit_guarded(
    compiler: &dyn Compiler,
    program: &TypedProgram,
    request: &CompileRequest<'_>,
) -> Result<EmittedImage, Diagnostic> {
    run_contained(|| compiler.emit(program, request)).map_err(|fault| {
        tracing::error!(target = "lumen.compiler", error = %fault, "code generation failed");
        fault_diagnostic(&fault)
    })
}

/// Reload references into `compiler`, converting faults and panics into a diagnostic.
pub fn load_references_guarded(
    compiler: &dyn Compiler,
    references: &ReferenceProjection,
) -> Result<(), Diagnostic> {
    run_contained(|| compiler.load_references(references)).map_err(|fault| {
        tracing::error!(target = "lumen.compiler", error = %fault, "reference reload failed");
        fault_diagnostic(&fault)
    })
}
