//! Shape inference (component C).
//!
//! Row-polymorphic unification over three axis kinds (batch/input/output)
//! with projection derivation for loop-index planning.

pub mod dim;
pub mod labels;
pub mod projections;
pub mod row;
pub mod unify;

pub use dim::Dim;
pub use labels::{parse_einsum_spec, parse_slot, EinsumSpec, Label, SlotLabels};
pub use projections::{derive_projections, Projections};
pub use row::{Constraint, Row, RowTerminator};

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::error::{TensorcError, TensorcResult};
use crate::index::proj::ProjClasses;
use crate::session::Session;

/// Which of the three rows an operation is talking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    Batch,
    Input,
    Output,
}

impl AxisKind {
    pub const ALL: [AxisKind; 3] = [AxisKind::Batch, AxisKind::Input, AxisKind::Output];

    fn name(self) -> &'static str {
        match self {
            AxisKind::Batch => "batch",
            AxisKind::Input => "input",
            AxisKind::Output => "output",
        }
    }
}

/// A tensor's shape: three rows (batch/input/output), mutated in place
/// during inference. Carries a stable id and a debug name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    pub id: u64,
    pub debug_name: String,
    pub batch: Row,
    pub input: Row,
    pub output: Row,
}

impl Shape {
    pub fn new(session: &mut Session, debug_name: impl Into<String>) -> Self {
        let id = session.alloc_shape_id();
        Shape {
            id,
            debug_name: debug_name.into(),
            batch: Row::open(session.alloc_symbol_id()),
            input: Row::open(session.alloc_symbol_id()),
            output: Row::open(session.alloc_symbol_id()),
        }
    }

    pub fn concrete(
        session: &mut Session,
        debug_name: impl Into<String>,
        batch: Vec<usize>,
        input: Vec<usize>,
        output: Vec<usize>,
        proj: &mut ProjClasses,
    ) -> Self {
        let id = session.alloc_shape_id();
        let mk = |dims: Vec<usize>, proj: &mut ProjClasses| {
            Row::fixed(dims.into_iter().map(|d| Dim::concrete(d, proj.fresh())).collect())
        };
        Shape {
            id,
            debug_name: debug_name.into(),
            batch: mk(batch, proj),
            input: mk(input, proj),
            output: mk(output, proj),
        }
    }

    pub fn row(&self, kind: AxisKind) -> &Row {
        match kind {
            AxisKind::Batch => &self.batch,
            AxisKind::Input => &self.input,
            AxisKind::Output => &self.output,
        }
    }

    pub fn row_mut(&mut self, kind: AxisKind) -> &mut Row {
        match kind {
            AxisKind::Batch => &mut self.batch,
            AxisKind::Input => &mut self.input,
            AxisKind::Output => &mut self.output,
        }
    }

    /// `to_dims(s)`: a concrete positive-integer array per row, or a
    /// precise shape error naming `s` if any row-variable remains.
    pub fn to_dims(&self, kind: AxisKind) -> TensorcResult<Vec<usize>> {
        self.row(kind).to_dims().ok_or_else(|| {
            TensorcError::shape(
                format!(
                    "shape `{}` (#{}) has an unresolved {} row",
                    self.debug_name,
                    self.id,
                    kind.name()
                ),
                alloc::vec![crate::error::TraceEntry::Shape {
                    id: self.id,
                    debug_name: self.debug_name.clone(),
                }],
            )
        })
    }

    pub fn is_fully_resolved(&self) -> bool {
        AxisKind::ALL.iter().all(|k| self.row(*k).is_resolved())
    }
}

impl core::fmt::Display for Shape {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let render = |row: &Row| -> String {
            match row.to_dims() {
                Some(dims) => dims
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                None => String::from("?"),
            }
        };
        write!(f, "{} | {} -> {}", render(&self.batch), render(&self.input), render(&self.output))
    }
}

/// What kind of unary op produced a shape.
#[derive(Debug, Clone)]
pub enum TransposeKind {
    /// Shape passes through unchanged (a pointwise unop).
    Identity,
    /// An axis-label permutation, e.g. `"ij->ji"`.
    Permute(String),
}

/// What kind of binary op produced a shape: `Broadcast(compose-kind, left, right)`.
#[derive(Debug, Clone)]
pub enum ComposeKind {
    /// Ordinary elementwise broadcasting, no label-driven contraction.
    Pointwise,
    /// An einsum spec binding labels across both operands.
    Einsum(String),
}

/// The shape-inference contract's input: given a logic and the already
/// (partially) known shapes it relates, fill as many row/dim variables
/// as possible.
pub enum Logic<'a> {
    Terminal(TerminalHint),
    Transpose(TransposeKind, &'a Shape),
    Broadcast(ComposeKind, &'a Shape, &'a Shape),
}

/// What a terminal (leaf) op's init-op implies about the shape.
#[derive(Debug, Clone, Copy)]
pub enum TerminalHint {
    /// `Constant-fill{strict=true}` with a literal array of this length.
    ConstantFillStrict(usize),
    /// `File-mapped` with this many elements (file length / precision width).
    FileMapped(usize),
    /// `Range-over-offsets` / `Standard-uniform`: no length constraint.
    Unconstrained,
}

/// Runs shape inference for one logic against `target`, mutating
/// `target`'s rows in place. Returns the projections record derived
/// against the (single, in this simplified model) right-hand-side shape
/// involved, when applicable.
pub fn infer_shape(
    target: &mut Shape,
    logic: &Logic,
    session: &mut Session,
) -> TensorcResult<()> {
    let mut proj = ProjClasses::new();
    let target_id = target.id;
    match logic {
        Logic::Terminal(hint) => apply_terminal(target, *hint)?,
        Logic::Transpose(TransposeKind::Identity, child) => {
            for kind in AxisKind::ALL {
                unify::unify_row(target.row_mut(kind), child.row(kind), &mut proj, target_id, kind.name())?;
            }
        }
        Logic::Transpose(TransposeKind::Permute(spec), child) => {
            derive_permute(target, child, spec, &mut proj)?;
        }
        Logic::Broadcast(ComposeKind::Pointwise, left, right) => {
            for kind in AxisKind::ALL {
                unify::unify_row(target.row_mut(kind), left.row(kind), &mut proj, target_id, kind.name())
                    .map_err(|e| compose_trace(e, target, left, right))?;
                unify::unify_row(target.row_mut(kind), right.row(kind), &mut proj, target_id, kind.name())
                    .map_err(|e| compose_trace(e, target, left, right))?;
            }
        }
        Logic::Broadcast(ComposeKind::Einsum(spec), left, right) => {
            derive_einsum(target, left, right, spec, &mut proj, session)
                .map_err(|e| compose_trace(e, target, left, right))?;
        }
    }
    let _ = session; // terminal/permute paths above may not need it
    Ok(())
}

/// Adds a `"Compose / "` message prefix and `Shape` trace frames for
/// `target`/`left`/`right` on top of whatever row/dim frame the failing
/// unification step already attached.
fn compose_trace(err: TensorcError, target: &Shape, left: &Shape, right: &Shape) -> TensorcError {
    match err {
        TensorcError::Shape { message, mut trace } => {
            trace.push(crate::error::TraceEntry::Shape { id: target.id, debug_name: target.debug_name.clone() });
            trace.push(crate::error::TraceEntry::Shape { id: left.id, debug_name: left.debug_name.clone() });
            trace.push(crate::error::TraceEntry::Shape { id: right.id, debug_name: right.debug_name.clone() });
            TensorcError::shape(format!("Compose / {message}"), trace)
        }
        other => other,
    }
}

fn apply_terminal(target: &mut Shape, hint: TerminalHint) -> TensorcResult<()> {
    match hint {
        TerminalHint::Unconstrained => Ok(()),
        TerminalHint::ConstantFillStrict(len) | TerminalHint::FileMapped(len) => {
            let io_elems = target
                .input
                .total_elems()
                .zip(target.output.total_elems())
                .map(|(i, o)| i * o);
            if let Some(io_elems) = io_elems {
                if io_elems == 0 {
                    return Ok(());
                }
                if len % io_elems != 0 {
                    return Err(TensorcError::user_input(format!(
                        "terminal length {len} is not divisible by input*output elements {io_elems}"
                    )));
                }
                target.batch.constraint = Constraint::TotalElems(len / io_elems);
                // Applied once the batch row's axis count is known, either
                // here (already-fixed batch) or later when something
                // unifies against it.
                if !matches!(target.batch.terminator, RowTerminator::RowVar(_))
                    || !target.batch.dims.is_empty()
                {
                    unify::apply_total_elems(&mut target.batch, target.id, "batch")?;
                }
            }
            Ok(())
        }
    }
}

/// `Permute(spec)`: instantiates fresh dim-variables per label and issues
/// row/dim equations matching `target`'s rows against the parsed labels,
/// and the same labels against `child`'s rows.
fn derive_permute(
    target: &mut Shape,
    child: &Shape,
    spec: &str,
    proj: &mut ProjClasses,
) -> TensorcResult<()> {
    let slot = parse_slot(spec)?;
    let mut vars: HashMap<String, Dim> = HashMap::new();
    bind_labels_to_row(&slot.batch, child.row(AxisKind::Batch), &mut vars, proj)?;
    bind_labels_to_row(&slot.input, child.row(AxisKind::Input), &mut vars, proj)?;
    bind_labels_to_row(&slot.output, child.row(AxisKind::Output), &mut vars, proj)?;
    // target's rows mirror child's rows but are free to relabel axes;
    // for a pure permutation the dims are identical, only the row a
    // label maps to may differ depending on the spec (kept identity here
    // since cross-row permutation is a front-end concern out of scope).
    let target_id = target.id;
    for kind in AxisKind::ALL {
        unify::unify_row(target.row_mut(kind), child.row(kind), proj, target_id, kind.name())?;
    }
    Ok(())
}

/// Binds each named label in `labels` to the corresponding dim of `row`,
/// recording (or checking against) a shared dim-variable per label name.
fn bind_labels_to_row(
    row_labels: &labels::RowLabels,
    row: &Row,
    vars: &mut HashMap<String, Dim>,
    proj: &mut ProjClasses,
) -> TensorcResult<()> {
    if row_labels.labels.is_empty() && !row_labels.ellipsis {
        return Ok(()); // this row wasn't mentioned in the spec part at all
    }
    let Some(dims) = row.to_dims() else {
        return Ok(()); // row not yet resolved; nothing to bind against
    };
    let named: Vec<&Label> = row_labels.labels.iter().collect();
    if named.len() != dims.len() && !row_labels.ellipsis {
        return Err(TensorcError::user_input(format!(
            "label count {} does not match row length {}",
            named.len(),
            dims.len()
        )));
    }
    // Align from the right when an ellipsis is present.
    let offset = dims.len().saturating_sub(named.len());
    for (i, label) in named.iter().enumerate() {
        let size = dims[offset + i];
        if let Label::Named(name) = label {
            match vars.get(name) {
                Some(Dim::Concrete { size: existing, .. }) if *existing != size => {
                    return Err(TensorcError::user_input(format!(
                        "label `{name}` bound to size {existing} and {size}"
                    )));
                }
                _ => {
                    vars.insert(name.clone(), Dim::concrete(size, proj.fresh()));
                }
            }
        }
    }
    Ok(())
}

/// `Einsum(spec)`: both operands' labeled rows are unified against
/// `target`'s rows, with same-labeled dims across operands and the
/// output bound to a single dim-variable.
fn derive_einsum(
    target: &mut Shape,
    left: &Shape,
    right: &Shape,
    spec: &str,
    proj: &mut ProjClasses,
    session: &mut Session,
) -> TensorcResult<()> {
    let parsed = parse_einsum_spec(spec)?;
    if parsed.operands.len() != 2 {
        return Err(TensorcError::user_input(
            "derive_einsum expects a binary einsum spec (`rhs1;rhs2=>lhs`)",
        ));
    }
    let mut vars: HashMap<String, Dim> = HashMap::new();
    bind_labels_to_row(&parsed.operands[0].batch, left.row(AxisKind::Batch), &mut vars, proj)?;
    bind_labels_to_row(&parsed.operands[0].input, left.row(AxisKind::Input), &mut vars, proj)?;
    bind_labels_to_row(&parsed.operands[0].output, left.row(AxisKind::Output), &mut vars, proj)?;
    bind_labels_to_row(&parsed.operands[1].batch, right.row(AxisKind::Batch), &mut vars, proj)?;
    bind_labels_to_row(&parsed.operands[1].input, right.row(AxisKind::Input), &mut vars, proj)?;
    bind_labels_to_row(&parsed.operands[1].output, right.row(AxisKind::Output), &mut vars, proj)?;

    let mut build_row = |labels: &labels::RowLabels, vars: &HashMap<String, Dim>| -> TensorcResult<Row> {
        let mut dims = Vec::with_capacity(labels.labels.len());
        for label in &labels.labels {
            match label {
                Label::Named(name) => {
                    let dim = vars.get(name).ok_or_else(|| {
                        TensorcError::shape(
                            format!("einsum output label `{name}` not bound by any operand"),
                            alloc::vec![crate::error::TraceEntry::Index {
                                description: format!("label `{name}`"),
                            }],
                        )
                    })?;
                    dims.push(dim.clone());
                }
                Label::Placeholder => dims.push(Dim::var(session.alloc_symbol_id())),
            }
        }
        Ok(if labels.ellipsis {
            Row::broadcastable(dims)
        } else {
            Row::fixed(dims)
        })
    };

    // A row with no named labels only carries an ellipsis: its dims are
    // whatever the *unlabeled* operand rows at that axis kind broadcast
    // to (an operand whose own row was itself consumed by named labels
    // contributes nothing here — those dims were contracted away). A row
    // with named labels is fully determined by `vars`.
    let target_id = target.id;
    let resolve = |out_labels: &labels::RowLabels,
                    operand_rows: &[(&labels::RowLabels, &Row)],
                    target_row: &mut Row,
                    vars: &HashMap<String, Dim>,
                    proj: &mut ProjClasses,
                    kind: &'static str,
                    build_row: &mut dyn FnMut(&labels::RowLabels, &HashMap<String, Dim>) -> TensorcResult<Row>|
     -> TensorcResult<()> {
        if out_labels.labels.is_empty() {
            for (operand_labels, row) in operand_rows {
                if operand_labels.labels.is_empty() {
                    unify::unify_row(target_row, row, proj, target_id, kind)?;
                }
            }
            Ok(())
        } else {
            let built = build_row(out_labels, vars)?;
            unify::unify_row(target_row, &built, proj, target_id, kind)
        }
    };
    resolve(
        &parsed.output.batch,
        &[
            (&parsed.operands[0].batch, left.row(AxisKind::Batch)),
            (&parsed.operands[1].batch, right.row(AxisKind::Batch)),
        ],
        &mut target.batch,
        &vars,
        proj,
        "batch",
        &mut build_row,
    )?;
    resolve(
        &parsed.output.input,
        &[
            (&parsed.operands[0].input, left.row(AxisKind::Input)),
            (&parsed.operands[1].input, right.row(AxisKind::Input)),
        ],
        &mut target.input,
        &vars,
        proj,
        "input",
        &mut build_row,
    )?;
    resolve(
        &parsed.output.output,
        &[
            (&parsed.operands[0].output, left.row(AxisKind::Output)),
            (&parsed.operands[1].output, right.row(AxisKind::Output)),
        ],
        &mut target.output,
        &vars,
        proj,
        "output",
        &mut build_row,
    )?;
    Ok(())
}

/// Completion pass: closes any remaining broadcast
/// row-variables to `Broadcastable` with no extra dims, and any broadcast
/// dim-variables to `Dim(1)`.
pub fn finish_inference(shape: &mut Shape, proj: &mut ProjClasses) {
    for kind in AxisKind::ALL {
        let row = shape.row_mut(kind);
        if matches!(row.terminator, RowTerminator::RowVar(_)) {
            row.terminator = RowTerminator::Broadcastable;
        }
        for dim in row.dims.iter_mut() {
            if dim.is_var() {
                *dim = Dim::concrete(1, proj.fresh());
            }
        }
    }
}
