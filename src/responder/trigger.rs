//! Filename bookkeeping for pipelined trigger capture.
//!
//! The capture queue runs `depth` images behind the triggers: the image
//! delivered at trigger `k` belongs to trigger `k - depth`, and the first
//! `depth` deliveries are placeholders from the queue filling up.

use std::collections::VecDeque;

use crate::error::Result;

#[derive(Debug)]
pub struct TriggerPipeline {
    depth: usize,
    pending: VecDeque<String>,
    placeholders: usize,
}

impl TriggerPipeline {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            pending: VecDeque::with_capacity(depth + 1),
            placeholders: depth,
        }
    }

    /// Names still waiting for their image.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Start a new session.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.placeholders = self.depth;
    }

    /// Record a trigger named `name` whose capture delivered `image`.
    ///
    /// Returns the name the image belongs to, or `None` for a placeholder.
    pub fn push(&mut self, name: String, image: Vec<u8>) -> Option<(String, Vec<u8>)> {
        self.pending.push_back(name);
        if self.placeholders > 0 {
            self.placeholders -= 1;
            return None;
        }
        self.pending.pop_front().map(|name| (name, image))
    }

    /// Drain the queue after the last trigger.
    ///
    /// Issues exactly `depth` further captures: remaining placeholders are
    /// discarded and every pending name receives one image, in order.
    pub fn flush<F>(&mut self, mut capture: F) -> Result<Vec<(String, Vec<u8>)>>
    where
        F: FnMut() -> Result<Vec<u8>>,
    {
        let mut delivered = Vec::with_capacity(self.pending.len());
        for _ in 0..self.depth {
            let image = capture()?;
            if self.placeholders > 0 {
                self.placeholders -= 1;
                continue;
            }
            if let Some(name) = self.pending.pop_front() {
                delivered.push((name, image));
            }
        }
        self.clear();
        Ok(delivered)
    }
}

/// Name for the `index`-th trigger image: `shot.jpg` -> `shot_0001.jpg`.
pub fn trigger_filename(base: &str, index: usize) -> String {
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{index:04}.{ext}"),
        _ => format!("{base}_{index:04}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run `n` triggers then flush, with images numbered by capture order.
    fn session(depth: usize, n: usize) -> (Vec<Option<String>>, Vec<(String, Vec<u8>)>, usize) {
        let mut pipeline = TriggerPipeline::new(depth);
        let mut captures = 0u8;
        let mut per_trigger = Vec::new();

        for k in 1..=n {
            captures += 1;
            let delivered = pipeline.push(format!("name{k}"), vec![captures]);
            per_trigger.push(delivered.map(|(name, _)| name));
        }
        let flushed = pipeline
            .flush(|| {
                captures += 1;
                Ok(vec![captures])
            })
            .unwrap();
        (per_trigger, flushed, captures as usize)
    }

    #[test]
    fn test_n_triggers_give_n_images_in_order() {
        let (per_trigger, flushed, captures) = session(2, 5);

        assert_eq!(
            per_trigger,
            vec![
                None,
                None,
                Some("name1".to_string()),
                Some("name2".to_string()),
                Some("name3".to_string())
            ]
        );
        let names: Vec<_> = flushed.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["name4", "name5"]);
        assert_eq!(captures, 5 + 2);
    }

    #[test]
    fn test_image_belongs_to_trigger_depth_back() {
        let mut pipeline = TriggerPipeline::new(2);
        assert!(pipeline.push("a".to_string(), vec![1]).is_none());
        assert!(pipeline.push("b".to_string(), vec![2]).is_none());
        assert_eq!(pipeline.push("c".to_string(), vec![3]), Some(("a".to_string(), vec![3])));
        assert_eq!(pipeline.pending(), 2);
    }

    #[test]
    fn test_fewer_triggers_than_depth() {
        let (per_trigger, flushed, captures) = session(3, 1);

        assert_eq!(per_trigger, vec![None]);
        // Two placeholders still in the queue are discarded, then name1 arrives
        assert_eq!(flushed, vec![("name1".to_string(), vec![4])]);
        assert_eq!(captures, 1 + 3);
    }

    #[test]
    fn test_no_triggers() {
        let (per_trigger, flushed, captures) = session(2, 0);
        assert!(per_trigger.is_empty());
        assert!(flushed.is_empty());
        assert_eq!(captures, 2);
    }

    #[test]
    fn test_every_count_and_depth() {
        for depth in 1..=4 {
            for n in 0..=8 {
                let (per_trigger, flushed, captures) = session(depth, n);
                let delivered = per_trigger.iter().flatten().count() + flushed.len();
                assert_eq!(delivered, n, "depth {depth}, {n} triggers");
                assert_eq!(captures, n + depth);
            }
        }
    }

    #[test]
    fn test_clear_restarts_placeholders() {
        let mut pipeline = TriggerPipeline::new(1);
        pipeline.push("a".to_string(), vec![]);
        pipeline.clear();
        assert_eq!(pipeline.pending(), 0);
        assert!(pipeline.push("b".to_string(), vec![]).is_none());
    }

    #[test]
    fn test_trigger_filename() {
        assert_eq!(trigger_filename("shot.jpg", 1), "shot_0001.jpg");
        assert_eq!(trigger_filename("run.2.png", 12), "run.2_0012.png");
        assert_eq!(trigger_filename("shot", 3), "shot_0003");
    }
}
