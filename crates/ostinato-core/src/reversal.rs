//! Filter for rapid "step, direction change, step" sequences.
//!
//! Near a velocity zero-crossing the range solver's bracket can oscillate
//! and produce a step immediately undone by a step in the opposite
//! direction. Both are numerical artifacts; neither must reach the sink.
//! Every candidate step is therefore held back until the next candidate (or
//! a flush far enough in the future) proves it real.

use crate::sink::{SinkError, StepSink};

/// How far past the last activity the flush driver keeps solving, so a held
/// step is either committed or discarded by later evaluation.
pub(crate) const SDS_CHECK_TIME: f64 = 0.001;
const SDS_FILTER_TIME: f64 = 0.000_750;

#[derive(Debug, Clone, Copy)]
struct PendingStep {
    dir: bool,
    move_print_time: f64,
    step_time: f64,
}

#[derive(Debug, Default)]
pub(crate) struct ReversalFilter {
    pending: Option<PendingStep>,
    last_dir: bool,
}

impl ReversalFilter {
    /// Direction of the most recent candidate step; seeds the next range
    /// solve.
    pub(crate) fn last_dir(&self) -> bool {
        self.last_dir
    }

    pub(crate) fn append<S: StepSink>(
        &mut self,
        sink: &mut S,
        dir: bool,
        move_print_time: f64,
        step_time: f64,
    ) -> Result<(), SinkError> {
        if let Some(p) = self.pending {
            if dir != p.dir {
                let mt_diff = move_print_time - p.move_print_time;
                let st_diff = step_time - p.step_time;
                if mt_diff + st_diff < SDS_FILTER_TIME {
                    // Roll back the held step and swallow this one
                    self.pending = None;
                    self.last_dir = dir;
                    return Ok(());
                }
            }
            self.commit(sink)?;
        }
        self.pending = Some(PendingStep {
            dir,
            move_print_time,
            step_time,
        });
        self.last_dir = dir;
        Ok(())
    }

    /// Commit the held step if the range solve ended far enough past it; a
    /// step still inside the filter window stays pending for the next range.
    pub(crate) fn flush<S: StepSink>(
        &mut self,
        sink: &mut S,
        move_print_time: f64,
        step_time: f64,
    ) -> Result<(), SinkError> {
        if let Some(p) = self.pending {
            let mt_diff = move_print_time - p.move_print_time;
            let st_diff = step_time - p.step_time;
            if mt_diff + st_diff >= SDS_FILTER_TIME {
                return self.commit(sink);
            }
        }
        Ok(())
    }

    pub(crate) fn commit<S: StepSink>(&mut self, sink: &mut S) -> Result<(), SinkError> {
        if let Some(p) = self.pending.take() {
            sink.append(p.dir, p.move_print_time, p.step_time)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;

    #[test]
    fn quick_reversal_is_swallowed() {
        let mut filter = ReversalFilter::default();
        let mut sink = RecordingSink::default();
        filter.append(&mut sink, true, 0.0, 0.0).unwrap();
        filter.append(&mut sink, false, 0.0, 0.0003).unwrap();
        filter.flush(&mut sink, 0.0, 0.01).unwrap();
        assert!(sink.steps.is_empty());
        assert!(!filter.last_dir());
    }

    #[test]
    fn same_direction_steps_pass_through() {
        let mut filter = ReversalFilter::default();
        let mut sink = RecordingSink::default();
        filter.append(&mut sink, true, 0.0, 0.0).unwrap();
        filter.append(&mut sink, true, 0.0, 0.0001).unwrap();
        assert_eq!(sink.steps.len(), 1);
        filter.commit(&mut sink).unwrap();
        assert_eq!(sink.steps.len(), 2);
    }

    #[test]
    fn slow_reversal_is_kept() {
        let mut filter = ReversalFilter::default();
        let mut sink = RecordingSink::default();
        filter.append(&mut sink, true, 0.0, 0.0).unwrap();
        filter.append(&mut sink, false, 0.0, 0.002).unwrap();
        filter.commit(&mut sink).unwrap();
        assert_eq!(sink.steps.len(), 2);
        assert!(sink.steps[0].dir);
        assert!(!sink.steps[1].dir);
    }

    #[test]
    fn flush_keeps_a_step_inside_the_window() {
        let mut filter = ReversalFilter::default();
        let mut sink = RecordingSink::default();
        filter.append(&mut sink, true, 0.0, 0.0100).unwrap();
        filter.flush(&mut sink, 0.0, 0.0104).unwrap();
        assert!(sink.steps.is_empty());
        filter.flush(&mut sink, 0.0, 0.0200).unwrap();
        assert_eq!(sink.steps.len(), 1);
    }
}
