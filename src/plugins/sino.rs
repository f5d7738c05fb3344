//! Sinogram generation: transposes a stream of projections into a stream
//! of sinograms.
//!
//! Each incoming projection of `w`×`h` contributes one row to each of `h`
//! sinograms of `w`×`num-projections`; the sinograms are emitted once the
//! projection stream ends.

use std::collections::VecDeque;

use crate::buffer::Buffer;
use crate::dims::Dims;
use crate::error::Result;
use crate::task::{Properties, PropertySpec, Task, TaskSpec};

pub struct SinoGenerator {
    spec: TaskSpec,
    /// Cap on the projections considered; 0 means "all that arrive".
    num_projections: usize,
    width: usize,
    received: usize,
    rows: Vec<Vec<f32>>,
    out: VecDeque<Vec<f32>>,
}

impl SinoGenerator {
    pub fn new(num_projections: usize) -> SinoGenerator {
        SinoGenerator {
            spec: TaskSpec::reductor(2, 2),
            num_projections,
            width: 0,
            received: 0,
            rows: Vec::new(),
            out: VecDeque::new(),
        }
    }

    pub fn schema() -> Vec<PropertySpec> {
        vec![PropertySpec::int("num-projections", 0, 8192, 0)]
    }

    pub fn from_properties(props: &Properties) -> SinoGenerator {
        SinoGenerator::new(props.get_int("num-projections").unwrap_or(0).max(0) as usize)
    }

    fn sino_height(&self) -> usize {
        if self.num_projections > 0 {
            self.received.min(self.num_projections)
        } else {
            self.received
        }
    }
}

impl Task for SinoGenerator {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn consume(&mut self, inputs: &mut [Buffer]) -> Result<()> {
        if self.num_projections > 0 && self.received >= self.num_projections {
            // Surplus projections beyond the configured cap are dropped.
            return Ok(());
        }

        let input = &mut inputs[0];
        let [w, h, _] = input.dims().to_lens();
        let data = input.host_data()?;

        if self.rows.is_empty() {
            self.width = w;
            self.rows = vec![Vec::new(); h];
        }

        for (sino, row) in self.rows.iter_mut().zip(data.chunks(w)) {
            sino.extend_from_slice(row);
        }
        self.received += 1;
        Ok(())
    }

    fn requisition(&mut self, _inputs: &[Buffer]) -> Result<Dims> {
        Ok(Dims::Two(self.width.max(1), self.sino_height().max(1)))
    }

    fn generate(&mut self, output: &mut Buffer) -> Result<bool> {
        if self.out.is_empty() && !self.rows.is_empty() {
            self.out = std::mem::take(&mut self.rows).into();
        }
        match self.out.pop_front() {
            Some(sino) => {
                output.set_host_data(&sino)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn finalize(&mut self) {
        self.rows.clear();
        self.out.clear();
    }
}
