//! Scripted detector for testing and bench operation.
//!
//! Answers are served from a queue; once it is empty the detector falls back
//! to its idle behaviour: either no detections at all, or a single
//! high-confidence detection rotating through the model's classes (the
//! stand-in used when no model is loaded).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use visionlink_core::{BoundingBox, ClassId, Detection, Frame};

use crate::traits::Detector;
use crate::{HardwareError, Result};

/// Confidence reported by rotating detections.
pub const ROTATING_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Clone)]
enum Answer {
    Detections(Vec<Detection>),
    Failure(String),
}

#[derive(Debug, Clone, Copy)]
enum IdleBehaviour {
    Empty,
    /// Number of classes in the model, zero-based indices.
    Rotate(usize),
}

/// Detector whose answers are scripted ahead of time.
///
/// # Examples
///
/// ```
/// use visionlink_core::{BoundingBox, ClassId, Detection, Frame};
/// use visionlink_hardware::mock::ScriptedDetector;
/// use visionlink_hardware::traits::Detector;
///
/// #[tokio::main]
/// async fn main() -> visionlink_hardware::Result<()> {
///     let detector = ScriptedDetector::new();
///     let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
///     detector.push(vec![Detection::new(ClassId::new(4).unwrap(), 0.92, bbox).unwrap()]);
///
///     let frame = Frame::blank(4, 4).unwrap();
///     assert_eq!(detector.infer(frame.clone()).await?.len(), 1);
///     assert!(detector.infer(frame).await?.is_empty());
///     assert_eq!(detector.calls(), 2);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Answer>>,
    idle: IdleBehaviour,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    /// Detector answering with no detections once the script runs out.
    pub fn new() -> Self {
        Self::with_idle(IdleBehaviour::Empty)
    }

    /// Detector cycling through `class_count` classes once the script runs out.
    pub fn rotating(class_count: usize) -> Self {
        Self::with_idle(IdleBehaviour::Rotate(class_count))
    }

    fn with_idle(idle: IdleBehaviour) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            idle,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulated inference time per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue an answer.
    pub fn push(&self, detections: Vec<Detection>) {
        self.enqueue(Answer::Detections(detections));
    }

    /// Queue a failing inference.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.enqueue(Answer::Failure(message.into()));
    }

    /// Inference calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enqueue(&self, answer: Answer) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(answer);
    }

    fn next_answer(&self) -> Option<Answer> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn idle_answer(&self, call: usize, frame: &Frame) -> Result<Vec<Detection>> {
        match self.idle {
            IdleBehaviour::Empty | IdleBehaviour::Rotate(0) => Ok(Vec::new()),
            IdleBehaviour::Rotate(class_count) => {
                // Model output is zero-based; translate once, here.
                let class_id = ClassId::from_index(call % class_count)
                    .map_err(|e| HardwareError::inference(e.to_string()))?;
                let (w, h) = (frame.width as f32, frame.height as f32);
                let bbox = BoundingBox::new(w * 0.25, h * 0.25, w * 0.75, h * 0.75)
                    .map_err(|e| HardwareError::inference(e.to_string()))?;
                let detection = Detection::new(class_id, ROTATING_CONFIDENCE, bbox)
                    .map_err(|e| HardwareError::inference(e.to_string()))?;
                Ok(vec![detection])
            }
        }
    }
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ScriptedDetector {
    async fn infer(&self, frame: Frame) -> Result<Vec<Detection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_answer() {
            Some(Answer::Detections(detections)) => Ok(detections),
            Some(Answer::Failure(message)) => Err(HardwareError::inference(message)),
            None => self.idle_answer(call, &frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rotating_detector_uses_one_based_ids() {
        let detector = ScriptedDetector::rotating(3);
        let frame = Frame::blank(100, 100).unwrap();

        let mut ids = Vec::new();
        for _ in 0..4 {
            let detections = detector.infer(frame.clone()).await.unwrap();
            assert_eq!(detections.len(), 1);
            assert_eq!(detections[0].confidence, ROTATING_CONFIDENCE);
            ids.push(detections[0].class_id.get());
        }
        assert_eq!(ids, vec![1, 2, 3, 1]);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let detector = ScriptedDetector::new();
        detector.push_failure("model not loaded");
        let err = detector.infer(Frame::blank(1, 1).unwrap()).await.unwrap_err();
        assert!(matches!(err, HardwareError::InferenceFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let detector = ScriptedDetector::new().with_latency(Duration::from_millis(30));
        let started = tokio::time::Instant::now();
        detector.infer(Frame::blank(1, 1).unwrap()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
