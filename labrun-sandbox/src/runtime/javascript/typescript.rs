//! TypeScript type stripping.
//!
//! Removes type annotations with SWC so V8 can run the result. No type
//! checking is performed; plain JavaScript passes through unchanged. The
//! emitted code does not keep the original layout, so a [`LineMap`] built
//! from SWC's source map translates stack positions back to the source.
//! Stacks that user code prints itself through `console` are not translated.

use crate::error::SandboxError;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use swc_core::common::{comments::SingleThreadedComments, sync::Lrc, Globals, Mark, SourceMap, GLOBALS};
use swc_core::ecma::ast::Pass;
use swc_core::ecma::codegen::{text_writer::JsWriter, Emitter};
use swc_core::ecma::parser::{lexer::Lexer, Parser, StringInput, Syntax, TsSyntax};
use swc_core::ecma::transforms::base::{fixer::fixer, hygiene::hygiene, resolver};
use swc_core::ecma::transforms::typescript::strip;

// `file:line:column` as V8 prints it in stack frames
static POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\s()]+):(\d+):(\d+)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    generated_col: u32,
    line: u32,
    col: u32,
}

/// Generated-to-original positions of one stripped script.
///
/// Lines and columns are zero-based internally and one-based at the edges,
/// matching V8 stack frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LineMap {
    lines: Vec<Vec<Segment>>,
}

impl LineMap {
    /// Original one-based position of a generated one-based position
    pub fn original(&self, line: u32, col: u32) -> Option<(u32, u32)> {
        let segments = self.lines.get(line.checked_sub(1)? as usize)?;
        let col = col.saturating_sub(1);
        let segment = segments
            .iter()
            .take_while(|s| s.generated_col <= col)
            .last()
            .or_else(|| segments.first())?;
        Some((segment.line + 1, segment.col + (col - segment.generated_col.min(col)) + 1))
    }

    /// Account for `by` characters inserted before the first generated line
    pub fn shift_first_line(&mut self, by: u32) {
        if let Some(first) = self.lines.first_mut() {
            for segment in first {
                segment.generated_col += by;
            }
        }
    }

    /// Rewrite every `script:line:col` position in `stack` that belongs to `script`
    pub fn remap_stack(&self, script: &str, stack: &str) -> String {
        POSITION_RE
            .replace_all(stack, |caps: &Captures| {
                let position = caps[2].parse().ok().zip(caps[3].parse().ok());
                match position.and_then(|(line, col)| self.original(line, col)) {
                    Some((line, col)) if &caps[1] == script => format!("{script}:{line}:{col}"),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

pub fn strip_typescript_types(code: &str) -> Result<String, SandboxError> {
    strip_with_line_map(code).map(|(js, _)| js)
}

pub(crate) fn strip_with_line_map(code: &str) -> Result<(String, LineMap), SandboxError> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(swc_core::common::FileName::Anon.into(), code.to_string());
    let comments = SingleThreadedComments::default();

    let lexer = Lexer::new(
        Syntax::Typescript(TsSyntax {
            tsx: true,
            ..Default::default()
        }),
        Default::default(),
        StringInput::from(&*fm),
        Some(&comments),
    );

    let mut parser = Parser::new_from(lexer);
    let mut program = parser
        .parse_program()
        .map_err(|e| SandboxError::TypeScript(format!("{:?}", e.kind())))?;

    for e in parser.take_errors() {
        tracing::debug!(error = ?e.kind(), "Recoverable TypeScript parse error");
    }

    let globals = Globals::default();
    GLOBALS.set(&globals, || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();

        resolver(unresolved_mark, top_level_mark, true).process(&mut program);
        strip(unresolved_mark, top_level_mark).process(&mut program);
        hygiene().process(&mut program);
        fixer(Some(&comments)).process(&mut program);

        let mut buf = vec![];
        let mut mappings = Vec::new();
        {
            let mut emitter = Emitter {
                cfg: swc_core::ecma::codegen::Config::default(),
                cm: cm.clone(),
                comments: Some(&comments),
                wr: JsWriter::new(cm.clone(), "\n", &mut buf, Some(&mut mappings)),
            };
            emitter
                .emit_program(&program)
                .map_err(|e| SandboxError::TypeScript(format!("failed to emit JavaScript: {e}")))?;
        }

        let mut line_map = LineMap::default();
        for (pos, generated) in &mappings {
            if pos.is_dummy() {
                continue;
            }
            let Ok(loc) = cm.try_lookup_char_pos(*pos) else {
                continue;
            };
            let index = generated.line as usize;
            if line_map.lines.len() <= index {
                line_map.lines.resize_with(index + 1, Vec::new);
            }
            line_map.lines[index].push(Segment {
                generated_col: generated.col,
                line: (loc.line as u32).saturating_sub(1),
                col: loc.col.0 as u32,
            });
        }
        for segments in &mut line_map.lines {
            segments.sort_by_key(|s| s.generated_col);
        }

        let js = String::from_utf8(buf)
            .map_err(|e| SandboxError::TypeScript(format!("non-UTF-8 output: {e}")))?;
        Ok((js, line_map))
    })
}
