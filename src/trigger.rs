//! In-memory trigger configuration shared by the software trigger
//! (base variant) and the FPGA settings frame (DSLogic variant).
//!
//! The matrix is 16 stages of 16 probes, plus one extra terminal row
//! (index [`STAGES`]) holding the "simple" trigger. Every accessor
//! here is pure and total within its documented precondition; see
//! `wire::build_settings_frame` for how the derived planes end up on
//! the wire.

/// Number of addressable trigger stages (not counting the terminal
/// "simple" row at index [`STAGES`]).
pub const STAGES: usize = 16;

/// Number of probes (channels) a stage can match against.
pub const PROBES: usize = 16;

/// Number of stages actually wired into hardware/software triggering.
/// The matrix has room for 16 stages, but only the first
/// `NUM_TRIGGER_STAGES` participate in either the base variant's
/// software trigger or the DSLogic FPGA's advanced-mode planes.
pub const NUM_TRIGGER_STAGES: usize = 4;

/// Don't-care / edge-sensitive symbol alphabet for a single matrix
/// cell.
pub const SYM_LOW: u8 = b'0';
pub const SYM_HIGH: u8 = b'1';
pub const SYM_DONT_CARE: u8 = b'X';
pub const SYM_RISING: u8 = b'R';
pub const SYM_FALLING: u8 = b'F';
pub const SYM_CHANGE: u8 = b'C';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Simple,
    Advanced,
}

/// A 17x16 symbol matrix (16 stages + 1 terminal "simple" row).
#[derive(Clone, Copy)]
pub struct SymbolMatrix {
    rows: [[u8; PROBES]; STAGES + 1],
}

impl SymbolMatrix {
    fn filled(sym: u8) -> Self {
        Self {
            rows: [[sym; PROBES]; STAGES + 1],
        }
    }

    fn row(&self, stage: usize) -> &[u8; PROBES] {
        &self.rows[stage]
    }

    fn row_mut(&mut self, stage: usize) -> &mut [u8; PROBES] {
        &mut self.rows[stage]
    }
}

/// The full DSLogic trigger configuration: two parallel symbol
/// matrices (`trigger0`/`trigger1`), per-stage counts/invert/logic,
/// and the global enable/mode/position/stage-count fields.
pub struct TriggerModel {
    trigger0: SymbolMatrix,
    trigger1: SymbolMatrix,
    counts: [u16; STAGES],
    invert: [u8; STAGES],
    logic: [u8; STAGES],
    pub enable: bool,
    pub mode: TriggerMode,
    /// Trigger position, 0..=100 (percent of the post-trigger buffer).
    pub position: u8,
    /// Number of active stages (informational; serialized as
    /// `trig_glb`).
    pub stages: u8,
}

impl Default for TriggerModel {
    fn default() -> Self {
        let mut t = Self {
            trigger0: SymbolMatrix::filled(SYM_DONT_CARE),
            trigger1: SymbolMatrix::filled(SYM_DONT_CARE),
            counts: [0; STAGES],
            invert: [0; STAGES],
            logic: [1; STAGES],
            enable: false,
            mode: TriggerMode::Simple,
            position: 0,
            stages: 0,
        };
        t.reset();
        t
    }
}

impl TriggerModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores the all-don't-care, disabled, simple-mode initial
    /// state.
    pub fn reset(&mut self) {
        self.trigger0 = SymbolMatrix::filled(SYM_DONT_CARE);
        self.trigger1 = SymbolMatrix::filled(SYM_DONT_CARE);
        self.counts = [0; STAGES];
        self.invert = [0; STAGES];
        self.logic = [1; STAGES];
        self.enable = false;
        self.mode = TriggerMode::Simple;
        self.position = 0;
        self.stages = 0;
    }

    /// Writes both symbol rows for `stage` from two interleaved
    /// source strings with stride 2 (one symbol per odd byte
    /// position). Destination columns are mirrored: destination
    /// column `probes - j - 1` receives source byte `2j`.
    pub fn stage_set_symbols(
        &mut self,
        stage: usize,
        probes: usize,
        row0: &[u8],
        row1: &[u8],
    ) {
        assert!(stage < STAGES);
        assert!(probes <= PROBES);
        for j in 0..probes {
            let src = 2 * j;
            let dst = probes - j - 1;
            if let Some(&b) = row0.get(src) {
                self.trigger0.row_mut(stage)[dst] = b;
            }
            if let Some(&b) = row1.get(src) {
                self.trigger1.row_mut(stage)[dst] = b;
            }
        }
    }

    pub fn stage_set_logic(&mut self, stage: usize, logic: u8) {
        assert!(stage < STAGES);
        self.logic[stage] = logic;
    }

    pub fn stage_set_inv(&mut self, stage: usize, inv: u8) {
        assert!(stage < STAGES);
        self.invert[stage] = inv;
    }

    pub fn stage_set_count(&mut self, stage: usize, count: u16) {
        assert!(stage < STAGES);
        self.counts[stage] = count;
    }

    /// Writes the terminal "simple" row at `probe`. This is the only
    /// sanctioned way to write row index [`STAGES`] (see module docs
    /// on the read-vs-write asymmetry at that boundary).
    pub fn probe_set(&mut self, probe: usize, sym0: u8, sym1: u8) {
        assert!(probe < PROBES);
        self.trigger0.row_mut(STAGES)[probe] = sym0;
        self.trigger1.row_mut(STAGES)[probe] = sym1;
    }

    pub fn set_stage_count(&mut self, stages: u8) {
        self.stages = stages;
    }

    pub fn set_position(&mut self, position: u8) {
        assert!(position <= 100);
        self.position = position;
    }

    pub fn set_enable(&mut self, enable: bool) {
        self.enable = enable;
    }

    pub fn set_mode(&mut self, mode: TriggerMode) {
        self.mode = mode;
    }

    /// Row index used when reading the "simple" trigger: reads are
    /// permitted at `stage == STAGES` (unlike the setters, which
    /// require `stage < STAGES` and route through [`Self::probe_set`]
    /// instead). See module docs.
    fn simple_row(&self) -> usize {
        STAGES
    }

    fn mask0_row(row: &[u8; PROBES]) -> u16 {
        derive_plane(row, |s| s == SYM_DONT_CARE || s == SYM_CHANGE)
    }
    fn value_row(row: &[u8; PROBES]) -> u16 {
        derive_plane(row, |s| s == SYM_HIGH || s == SYM_RISING)
    }
    fn edge_row(row: &[u8; PROBES]) -> u16 {
        derive_plane(row, |s| {
            s == SYM_RISING || s == SYM_FALLING || s == SYM_CHANGE
        })
    }

    pub fn mask0(&self, stage: usize) -> u16 {
        Self::mask0_row(self.trigger0.row(stage))
    }
    pub fn mask1(&self, stage: usize) -> u16 {
        Self::mask0_row(self.trigger1.row(stage))
    }
    pub fn value0(&self, stage: usize) -> u16 {
        Self::value_row(self.trigger0.row(stage))
    }
    pub fn value1(&self, stage: usize) -> u16 {
        Self::value_row(self.trigger1.row(stage))
    }
    pub fn edge0(&self, stage: usize) -> u16 {
        Self::edge_row(self.trigger0.row(stage))
    }
    pub fn edge1(&self, stage: usize) -> u16 {
        Self::edge_row(self.trigger1.row(stage))
    }

    pub fn simple_mask0(&self) -> u16 {
        self.mask0(self.simple_row())
    }
    pub fn simple_mask1(&self) -> u16 {
        self.mask1(self.simple_row())
    }
    pub fn simple_value0(&self) -> u16 {
        self.value0(self.simple_row())
    }
    pub fn simple_value1(&self) -> u16 {
        self.value1(self.simple_row())
    }
    pub fn simple_edge0(&self) -> u16 {
        self.edge0(self.simple_row())
    }
    pub fn simple_edge1(&self) -> u16 {
        self.edge1(self.simple_row())
    }

    pub fn count(&self, stage: usize) -> u16 {
        self.counts[stage]
    }
    pub fn invert(&self, stage: usize) -> u8 {
        self.invert[stage]
    }
    pub fn logic(&self, stage: usize) -> u8 {
        self.logic[stage]
    }
}

/// Extracts one 16-bit bit-plane from a stage row. Columns are
/// visited high to low, shift-accumulating into the result, so that
/// bit `i` of the returned word is the predicate applied to column
/// `i`.
fn derive_plane(row: &[u8; PROBES], predicate: impl Fn(u8) -> bool) -> u16 {
    let mut plane: u16 = 0;
    for &sym in row.iter().rev() {
        plane = (plane << 1) | (predicate(sym) as u16);
    }
    plane
}

#[cfg(test)]
#[path = "tests/trigger.rs"]
mod tests;
