use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::dataflow::frame::{Frame, Interpreter};
use crate::dataflow::opcode_semantics::{Effect, decode};
use crate::dataflow::Kind;
use crate::descriptor::parameter_types;
use crate::ir::{Instruction, LabelId, Method};
use crate::opcodes;

/// Average number of visits each instruction may use before the analysis
/// gives up. Caps loops whose merges never converge.
const MAX_VISITS_PER_INSTRUCTION: usize = 512;

/// Frames before each instruction; `None` marks unreachable code.
pub(crate) type Frames<V> = Vec<Option<Frame<V>>>;

/// Run a forward dataflow analysis over `method` with the given domain.
pub(crate) fn analyze<I>(method: &Method, interpreter: &mut I) -> Result<Frames<I::Value>>
where
    I: Interpreter,
{
    analyze_with_edges(method, interpreter, |_, _| {})
}

/// Same as [`analyze`], reporting every normal control-flow edge as it is
/// followed. Exception edges are not reported.
pub(crate) fn analyze_with_edges<I, F>(
    method: &Method,
    interpreter: &mut I,
    mut on_edge: F,
) -> Result<Frames<I::Value>>
where
    I: Interpreter,
    F: FnMut(usize, usize),
{
    let instructions = &method.instructions;
    let mut frames: Frames<I::Value> = vec![None; instructions.len()];
    if instructions.is_empty() {
        return Ok(frames);
    }

    let labels = method.label_positions();
    let handlers = handler_ranges(method, &labels)?;
    let mut effects = Vec::with_capacity(instructions.len());
    for (index, instruction) in instructions.iter().enumerate() {
        effects.push(decode(instruction).with_context(|| format!("instruction {index}"))?);
    }

    let mut worklist = Worklist::new(instructions.len());
    frames[0] = Some(initial_frame(method, interpreter)?);
    worklist.push(0);

    while let Some(index) = worklist.pop() {
        worklist.visit(index)?;
        let Some(before) = frames[index].clone() else {
            continue;
        };
        let instruction = &instructions[index];

        let mut after = before.clone();
        after
            .execute(interpreter, index, instruction, effects[index])
            .with_context(|| format!("execute instruction {index} ({instruction:?})"))?;

        for successor in successors(index, instruction, effects[index], &labels)? {
            if successor >= instructions.len() {
                anyhow::bail!("execution can fall off the end of the code");
            }
            on_edge(index, successor);
            merge_into(&mut frames, &mut worklist, interpreter, successor, &after)?;
        }

        for handler in handlers.iter().filter(|range| range.covers(index)) {
            let mut handler_frame = before.clone();
            handler_frame.stack.clear();
            handler_frame.push(interpreter.new_value(Kind::Reference));
            merge_into(
                &mut frames,
                &mut worklist,
                interpreter,
                handler.handler,
                &handler_frame,
            )?;
        }
    }

    Ok(frames)
}

/// Instruction indexes that normally follow `index`.
fn successors(
    index: usize,
    instruction: &Instruction,
    effect: Effect,
    labels: &BTreeMap<LabelId, usize>,
) -> Result<Vec<usize>> {
    let resolve = |label: LabelId| -> Result<usize> {
        labels
            .get(&label)
            .copied()
            .with_context(|| format!("jump to unknown label {label:?}"))
    };
    match instruction {
        Instruction::Jump { opcode, target } => {
            let mut next = Vec::with_capacity(2);
            if *opcode != opcodes::GOTO {
                next.push(index + 1);
            }
            next.push(resolve(*target)?);
            Ok(next)
        }
        Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => instruction
            .jump_targets()
            .into_iter()
            .map(resolve)
            .collect(),
        _ => match effect {
            Effect::Return { .. } | Effect::Throw => Ok(Vec::new()),
            _ => Ok(vec![index + 1]),
        },
    }
}

fn merge_into<I>(
    frames: &mut Frames<I::Value>,
    worklist: &mut Worklist,
    interpreter: &mut I,
    target: usize,
    frame: &Frame<I::Value>,
) -> Result<()>
where
    I: Interpreter,
{
    let Some(existing) = frames[target].as_mut() else {
        frames[target] = Some(frame.clone());
        worklist.push(target);
        return Ok(());
    };
    if existing
        .merge(interpreter, frame)
        .with_context(|| format!("merge frames at instruction {target}"))?
    {
        worklist.push(target);
    }
    Ok(())
}

fn initial_frame<I>(method: &Method, interpreter: &mut I) -> Result<Frame<I::Value>>
where
    I: Interpreter,
{
    let parameters = parameter_types(&method.descriptor)
        .with_context(|| format!("parse descriptor of {}", method.name))?;
    let mut locals = Vec::new();
    if !method.is_static() {
        locals.push(interpreter.new_value(Kind::Reference));
    }
    for parameter in &parameters {
        let kind = Kind::of_type(parameter).context("void parameter")?;
        locals.push(interpreter.new_value(kind));
        if kind.size() == 2 {
            locals.push(interpreter.new_value(Kind::Uninitialized));
        }
    }
    let needed = local_slots_used(method).max(method.max_locals as usize);
    while locals.len() < needed {
        locals.push(interpreter.new_value(Kind::Uninitialized));
    }
    Ok(Frame::new(locals))
}

/// Highest local slot touched by the code, plus its width.
pub(crate) fn local_slots_used(method: &Method) -> usize {
    method
        .instructions
        .iter()
        .filter_map(|instruction| match instruction {
            Instruction::Var { opcode, index } => {
                let wide = matches!(
                    *opcode,
                    opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE
                );
                Some(*index as usize + if wide { 2 } else { 1 })
            }
            Instruction::Iinc { index, .. } => Some(*index as usize + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

/// Protected instruction range resolved to indexes.
struct HandlerRange {
    start: usize,
    end: usize,
    handler: usize,
}

impl HandlerRange {
    fn covers(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }
}

fn handler_ranges(method: &Method, labels: &BTreeMap<LabelId, usize>) -> Result<Vec<HandlerRange>> {
    method
        .try_catch_blocks
        .iter()
        .map(|block| {
            let position = |label: LabelId| {
                labels
                    .get(&label)
                    .copied()
                    .with_context(|| format!("try-catch block refers to unknown label {label:?}"))
            };
            Ok(HandlerRange {
                start: position(block.start)?,
                end: position(block.end)?,
                handler: position(block.handler)?,
            })
        })
        .collect()
}

/// LIFO worklist with membership flags and a visit budget.
struct Worklist {
    stack: Vec<usize>,
    queued: Vec<bool>,
    visits: usize,
    budget: usize,
}

impl Worklist {
    fn new(len: usize) -> Self {
        Self {
            stack: Vec::new(),
            queued: vec![false; len],
            visits: 0,
            budget: len.saturating_mul(MAX_VISITS_PER_INSTRUCTION),
        }
    }

    fn push(&mut self, index: usize) {
        if !self.queued[index] {
            self.queued[index] = true;
            self.stack.push(index);
        }
    }

    fn pop(&mut self) -> Option<usize> {
        let index = self.stack.pop()?;
        self.queued[index] = false;
        Some(index)
    }

    fn visit(&mut self, index: usize) -> Result<()> {
        self.visits += 1;
        if self.visits > self.budget {
            anyhow::bail!("analysis did not converge (last instruction {index})");
        }
        Ok(())
    }
}
