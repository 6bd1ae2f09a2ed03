// ============================================================
// Layer 2 — TensorUseCase
// ============================================================
// Runs the tensor tour and hands the titled steps back to the
// CLI for printing. No arguments: every input is a literal.

use anyhow::Result;

use crate::ml::tensor_tour::{run_tour, TourStep};

pub struct TensorUseCase;

impl TensorUseCase {
    pub fn execute(&self) -> Result<Vec<TourStep>> {
        tracing::info!("Running the tensor tour");
        run_tour()
    }
}
