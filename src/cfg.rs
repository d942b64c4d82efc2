use anyhow::Result;

use crate::dataflow::basic::BasicInterpreter;
use crate::dataflow::worklist::analyze_with_edges;
use crate::ir::{Instruction, Method};

/// Run of instructions `[start, end)` ending at a label boundary or a branch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Block {
    pub(crate) start: usize,
    pub(crate) end: usize,
    /// Block reached by falling through.
    pub(crate) next: Option<usize>,
    pub(crate) prev: Option<usize>,
    /// Blocks reached by a jump or switch, in discovery order.
    pub(crate) branches: Vec<usize>,
}

/// Block graph of one method, built from the edges the frame analysis follows.
#[derive(Debug)]
pub(crate) struct ControlFlowGraph {
    pub(crate) blocks: Vec<Block>,
}

impl ControlFlowGraph {
    pub(crate) fn build(method: &Method) -> Result<Self> {
        let mut graph = Self {
            blocks: split_blocks(&method.instructions),
        };
        let mut edges = Vec::new();
        analyze_with_edges(method, &mut BasicInterpreter, |from, to| edges.push((from, to)))?;
        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        Ok(graph)
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        let (Some(current), Some(successor)) = (self.find_block(from), self.find_block(to)) else {
            return;
        };
        if current == successor {
            return;
        }
        if from + 1 == to {
            self.blocks[current].next = Some(successor);
            self.blocks[successor].prev = Some(current);
        } else if !self.blocks[current].branches.contains(&successor) {
            self.blocks[current].branches.push(successor);
        }
    }

    fn find_block(&self, index: usize) -> Option<usize> {
        self.blocks
            .iter()
            .position(|block| (block.start..block.end).contains(&index))
    }

    /// First block of the fall-through chain containing `block`.
    pub(crate) fn origin(&self, block: usize) -> usize {
        let mut current = block;
        while let Some(prev) = self.blocks[current].prev {
            current = prev;
        }
        current
    }

    /// Instructions laid out in execution order; unreachable blocks are dropped.
    ///
    /// Fall-through chains stay contiguous, so the reordered code keeps the
    /// original semantics without inserting jumps.
    pub(crate) fn reorder(&self, instructions: &[Instruction]) -> Vec<Instruction> {
        let mut reordered = Vec::with_capacity(instructions.len());
        if self.blocks.is_empty() {
            return reordered;
        }
        let mut moved = vec![false; self.blocks.len()];
        let mut pending = vec![0];
        while let Some(index) = pending.pop() {
            if moved[index] {
                continue;
            }
            moved[index] = true;
            let block = &self.blocks[index];
            pending.extend(block.branches.iter().map(|branch| self.origin(*branch)));
            if let Some(next) = block.next {
                pending.push(next);
            }
            reordered.extend_from_slice(&instructions[block.start..block.end]);
        }
        reordered
    }
}

fn split_blocks(instructions: &[Instruction]) -> Vec<Block> {
    if instructions.is_empty() {
        return Vec::new();
    }
    let mut blocks = vec![Block::default()];
    for (index, instruction) in instructions.iter().enumerate() {
        let current = blocks.len() - 1;
        blocks[current].end += 1;
        let Some(next) = instructions.get(index + 1) else {
            break;
        };
        let branches = matches!(
            instruction,
            Instruction::Jump { .. } | Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. }
        );
        if branches || matches!(next, Instruction::Label(_)) {
            blocks.push(Block {
                start: index + 1,
                end: index + 1,
                ..Block::default()
            });
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_STATIC, LabelId};
    use crate::opcodes;

    fn goto(target: LabelId) -> Instruction {
        Instruction::Jump {
            opcode: opcodes::GOTO,
            target,
        }
    }

    fn scrambled() -> (Method, LabelId, LabelId) {
        let mut method = Method::new("m", "()I", ACC_STATIC);
        let tail = method.new_label();
        let body = method.new_label();
        method.instructions = vec![
            goto(body),
            Instruction::Label(tail),
            Instruction::Simple(opcodes::ICONST_1),
            Instruction::Simple(opcodes::IRETURN),
            Instruction::Label(body),
            Instruction::Simple(opcodes::ICONST_0),
            Instruction::Simple(opcodes::POP),
            goto(tail),
        ];
        (method, tail, body)
    }

    #[test]
    fn splits_at_labels_and_branches() {
        let (method, _, _) = scrambled();
        let graph = ControlFlowGraph::build(&method).expect("cfg");

        let bounds: Vec<_> = graph.blocks.iter().map(|block| (block.start, block.end)).collect();
        assert_eq!(bounds, vec![(0, 1), (1, 4), (4, 8)]);
        assert_eq!(graph.blocks[0].branches, vec![2]);
        assert_eq!(graph.blocks[2].branches, vec![1]);
        assert_eq!(graph.blocks[1].prev, None);
    }

    #[test]
    fn reorders_blocks_in_execution_order() {
        let (method, tail, body) = scrambled();
        let graph = ControlFlowGraph::build(&method).expect("cfg");

        let reordered = graph.reorder(&method.instructions);

        assert_eq!(
            reordered,
            vec![
                goto(body),
                Instruction::Label(body),
                Instruction::Simple(opcodes::ICONST_0),
                Instruction::Simple(opcodes::POP),
                goto(tail),
                Instruction::Label(tail),
                Instruction::Simple(opcodes::ICONST_1),
                Instruction::Simple(opcodes::IRETURN),
            ]
        );
    }

    #[test]
    fn fall_through_links_next_and_prev() {
        let mut method = Method::new("m", "(I)V", ACC_STATIC);
        let skip = method.new_label();
        method.instructions = vec![
            Instruction::Var {
                opcode: opcodes::ILOAD,
                index: 0,
            },
            Instruction::Jump {
                opcode: opcodes::IFEQ,
                target: skip,
            },
            Instruction::Simple(opcodes::NOP),
            Instruction::Label(skip),
            Instruction::Simple(opcodes::RETURN),
        ];

        let graph = ControlFlowGraph::build(&method).expect("cfg");

        assert_eq!(graph.blocks.len(), 3);
        assert_eq!(graph.blocks[0].next, Some(1));
        assert_eq!(graph.blocks[1].next, Some(2));
        assert_eq!(graph.blocks[2].prev, Some(1));
        assert_eq!(graph.origin(2), 0);
        assert_eq!(graph.reorder(&method.instructions), method.instructions);
    }
}
