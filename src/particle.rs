use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// One slot of the state store: position in xyz, sprite scale in w.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct StateRecord {
    pub position: [f32; 3],
    pub scale: f32,
}

// Matches the RGBA32F texel layout the device kernels read.
const _: [(); 16] = [(); std::mem::size_of::<StateRecord>()];

impl StateRecord {
    pub fn new(position: Vec3, scale: f32) -> Self {
        Self {
            position: position.to_array(),
            scale,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}

/// Side length of the square texture that holds `count` records.
pub fn square_side(count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let mut side = (count as f64).sqrt().ceil() as usize;
    // Guard against sqrt rounding on very large counts.
    while side * side < count {
        side += 1;
    }
    while side > 1 && (side - 1) * (side - 1) >= count {
        side -= 1;
    }
    side
}

/// Fixed particle population: ids are `0..count`, colors never change after
/// construction, and `initial_state` seeds the device's state store.
#[derive(Debug, Clone)]
pub struct ParticleField {
    count: usize,
    side: usize,
    initial_state: Vec<StateRecord>,
    colors: Vec<[f32; 4]>,
}

impl ParticleField {
    /// Builds a field from per-particle records and colors. Both slices are
    /// padded with zeroed records up to the square slot count.
    pub fn new(records: Vec<StateRecord>, colors: Vec<[f32; 4]>) -> Result<Self, String> {
        if records.len() != colors.len() {
            return Err(format!(
                "particle record/color length mismatch: {} records, {} colors",
                records.len(),
                colors.len()
            ));
        }
        if u32::try_from(records.len()).is_err() {
            return Err(format!(
                "particle count {} exceeds u32 id space",
                records.len()
            ));
        }

        let count = records.len();
        let side = square_side(count);
        let slots = side * side;

        let mut initial_state = records;
        initial_state.resize(slots, StateRecord::zeroed());
        let mut colors = colors;
        colors.resize(slots, [0.0; 4]);

        Ok(Self {
            count,
            side,
            initial_state,
            colors,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn slot_count(&self) -> usize {
        self.side * self.side
    }

    pub fn initial_state(&self) -> &[StateRecord] {
        &self.initial_state
    }

    /// Colors for the live particles only (padding slots excluded).
    pub fn colors(&self) -> &[[f32; 4]] {
        &self.colors[..self.count]
    }

    /// Identity draw order used before the first sort lands.
    pub fn identity_order(&self) -> Vec<u32> {
        (0..self.count as u32).collect()
    }
}
