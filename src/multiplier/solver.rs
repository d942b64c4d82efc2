use std::collections::BTreeMap;

use anyhow::Result;
use tracing::warn;

use crate::modular::Number;

/// Largest quotient between two candidates for one to count as a factor of the other.
const MAX_FACTOR: u64 = 0xff;

/// Candidate multiplier observed for a field.
///
/// `dec` candidates were seen multiplying a read of the field; `enc` candidates
/// were seen multiplying a value written to it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Mul {
    pub(crate) dec: bool,
    pub(crate) n: Number,
}

impl Mul {
    pub(crate) fn dec(n: Number) -> Self {
        Self { dec: true, n }
    }

    pub(crate) fn enc(n: Number) -> Self {
        Self { dec: false, n }
    }

    pub(crate) fn decoder(self) -> Result<Number> {
        if self.dec { Ok(self.n) } else { self.n.invert() }
    }
}

/// `put := get * mul`: a value read from `get` is multiplied and stored into `put`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldMulAssign {
    pub(crate) put: String,
    pub(crate) get: String,
    pub(crate) mul: Number,
}

/// Field keyed candidate lists, iterated in first-insertion order.
#[derive(Debug, Default)]
pub(crate) struct PendingMuls {
    entries: Vec<(String, Vec<Mul>)>,
}

impl PendingMuls {
    pub(crate) fn push(&mut self, field: &str, mul: Mul) {
        match self.entries.iter_mut().find(|(key, _)| key == field) {
            Some((_, muls)) => muls.push(mul),
            None => self.entries.push((field.to_string(), vec![mul])),
        }
    }

    /// Removes one occurrence of `mul` for `field`, dropping the key once empty.
    pub(crate) fn remove(&mut self, field: &str, mul: Mul) -> bool {
        let Some(position) = self.entries.iter().position(|(key, _)| key == field) else {
            return false;
        };
        let muls = &mut self.entries[position].1;
        let Some(index) = muls.iter().position(|candidate| *candidate == mul) else {
            return false;
        };
        muls.remove(index);
        if muls.is_empty() {
            self.entries.remove(position);
        }
        true
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, field: &str) -> Option<&[Mul]> {
        self.entries
            .iter()
            .find(|(key, _)| key == field)
            .map(|(_, muls)| muls.as_slice())
    }
}

/// Constraint system collected over the whole pool.
#[derive(Debug, Default)]
pub(crate) struct Multipliers {
    pub(crate) pending: PendingMuls,
    pub(crate) assignments: Vec<FieldMulAssign>,
    pub(crate) decoders: BTreeMap<String, Number>,
}

impl Multipliers {
    pub(crate) fn assign(&mut self, assignment: FieldMulAssign) {
        if !self.assignments.contains(&assignment) {
            self.assignments.push(assignment);
        }
    }

    /// Resolve decoders until no candidate is left.
    pub(crate) fn solve(mut self) -> Result<BTreeMap<String, Number>> {
        loop {
            self.simplify()?;
            if self.pending.is_empty() {
                return Ok(self.decoders);
            }
            self.solve_one()?;
        }
    }

    /// Turns assignments with one resolved side into candidates for the other side.
    fn simplify(&mut self) -> Result<()> {
        let mut remaining = Vec::with_capacity(self.assignments.len());
        for assignment in std::mem::take(&mut self.assignments) {
            if let Some(decoder) = self.decoders.get(&assignment.put).copied() {
                let decx = decoder.wrapping_mul(assignment.mul);
                if decx.is_multiplier() {
                    self.pending.push(&assignment.get, Mul::dec(decx));
                }
            } else if let Some(decoder) = self.decoders.get(&assignment.get).copied() {
                let encx = decoder.invert()?.wrapping_mul(assignment.mul);
                if encx.is_multiplier() {
                    self.pending.push(&assignment.put, Mul::enc(encx));
                }
            } else {
                remaining.push(assignment);
            }
        }
        self.assignments = remaining;
        Ok(())
    }

    /// Settles one field, preferring fields no assignment depends on.
    fn solve_one(&mut self) -> Result<()> {
        let position = self
            .pending
            .entries
            .iter()
            .position(|(field, _)| {
                !self
                    .assignments
                    .iter()
                    .any(|assignment| assignment.get == *field || assignment.put == *field)
            })
            .unwrap_or(0);
        let (field, muls) = self.pending.entries.remove(position);
        let Some(decoder) = unfold(&muls)? else {
            // Left without a decoder, so none of its accesses are rewritten.
            warn!("Unable to resolve a multiplier for {field} from {} candidates", muls.len());
            return Ok(());
        };
        if let Some(voted) = frequency_vote(&muls)? {
            if voted != decoder {
                warn!(
                    "Frequency vote for {field} prefers {} over the resolved decoder {}",
                    voted.as_i64(),
                    decoder.as_i64()
                );
            }
        }
        self.decoders.insert(field, decoder);
        Ok(())
    }
}

/// Picks the decoder the candidate list agrees on.
fn unfold(muls: &[Mul]) -> Result<Option<Number>> {
    let mut distinct: Vec<Mul> = Vec::new();
    for mul in muls {
        if !distinct.contains(mul) {
            distinct.push(*mul);
        }
    }
    if let [single] = distinct.as_slice() {
        return Ok(Some(single.decoder()?));
    }

    let mut decoded = Vec::with_capacity(distinct.len());
    for mul in &distinct {
        decoded.push((*mul, mul.decoder()?));
    }
    let paired = decoded.iter().find(|(candidate, decoder)| {
        candidate.dec
            && decoded
                .iter()
                .any(|(other, other_decoder)| !other.dec && other_decoder == decoder)
    });
    if let Some((_, decoder)) = paired {
        return Ok(Some(*decoder));
    }

    let mut factors = Vec::new();
    for (candidate, decoder) in &decoded {
        let mut divides_all = true;
        for product in &distinct {
            if !is_factor(*product, *candidate)? {
                divides_all = false;
                break;
            }
        }
        if divides_all {
            factors.push((*candidate, *decoder));
        }
    }
    let chosen = match factors.as_slice() {
        [] => None,
        [(_, decoder)] => Some(*decoder),
        several => several
            .iter()
            .find(|(candidate, _)| candidate.dec)
            .or_else(|| several.first())
            .map(|(_, decoder)| *decoder),
    };
    Ok(chosen)
}

fn is_factor(product: Mul, factor: Mul) -> Result<bool> {
    Ok(div(product, factor)?.as_i64().unsigned_abs() <= MAX_FACTOR)
}

fn div(a: Mul, b: Mul) -> Result<Number> {
    if a.dec == b.dec {
        Ok(b.n.invert()?.wrapping_mul(a.n))
    } else {
        Ok(b.n.wrapping_mul(a.n))
    }
}

/// Decoder observed most often, when a single one leads.
fn frequency_vote(muls: &[Mul]) -> Result<Option<Number>> {
    let mut counts: Vec<(Number, usize)> = Vec::new();
    for mul in muls {
        let decoder = mul.decoder()?;
        match counts.iter_mut().find(|(existing, _)| *existing == decoder) {
            Some((_, count)) => *count += 1,
            None => counts.push((decoder, 1)),
        }
    }
    let Some(max) = counts.iter().map(|(_, count)| *count).max() else {
        return Ok(None);
    };
    let mut leaders = counts.iter().filter(|(_, count)| *count == max);
    match (leaders.next(), leaders.next()) {
        (Some((decoder, _)), None) => Ok(Some(*decoder)),
        _ => Ok(None),
    }
}
