use super::{check_counts, DrawTarget, Frame, RenderError};

/// Draw target with no output. Validates every frame's order and keeps
/// counters, for `--headless` runs and tests.
#[derive(Debug, Default)]
pub struct HeadlessTarget {
    seen: Vec<bool>,
    pub draws: u64,
    pub particles_drawn: u64,
    pub last_order_generation: u64,
    pub order_changes: u64,
}

impl HeadlessTarget {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawTarget for HeadlessTarget {
    fn draw(&mut self, frame: &Frame<'_>) -> Result<(), RenderError> {
        check_counts(frame)?;
        validate_permutation(frame.order, &mut self.seen)?;

        self.draws += 1;
        self.particles_drawn += frame.order.len() as u64;
        if frame.stats.order_generation != self.last_order_generation {
            self.order_changes += 1;
            self.last_order_generation = frame.stats.order_generation;
        }
        Ok(())
    }
}

/// Fails unless `order` holds every id in `0..order.len()` exactly once.
/// `seen` is scratch and is resized as needed.
pub fn validate_permutation(order: &[u32], seen: &mut Vec<bool>) -> Result<(), RenderError> {
    seen.clear();
    seen.resize(order.len(), false);
    for (slot, &id) in order.iter().enumerate() {
        let Some(mark) = seen.get_mut(id as usize) else {
            return Err(RenderError::InvalidOrder {
                reason: format!("id {id} at position {slot} is out of range"),
            });
        };
        if *mark {
            return Err(RenderError::InvalidOrder {
                reason: format!("id {id} appears more than once"),
            });
        }
        *mark = true;
    }
    Ok(())
}
