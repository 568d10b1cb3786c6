/// Ring buffer of recent frame energies.
#[derive(Debug, Clone)]
pub(crate) struct EnergyHistory {
    buffer: Vec<f32>,
    write_pos: usize,
    len: usize,
}

impl EnergyHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_pos: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: f32) {
        self.buffer[self.write_pos] = value;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        if self.len < self.buffer.len() {
            self.len += 1;
        }
    }

    /// Mean of the stored energies, `None` until something was pushed.
    pub fn mean(&self) -> Option<f32> {
        if self.len == 0 {
            return None;
        }
        Some(self.buffer[..self.len].iter().sum::<f32>() / self.len as f32)
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.len = 0;
    }
}
