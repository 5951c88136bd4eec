//! Face estimator capability: typed detection results and the adapter that
//! turns one estimate into a controller [`Sample`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::capture::Sample;
use crate::error::EstimatorError;
use crate::frame::FrameData;

/// Face bounding region in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Per-expression confidence scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpressionScores {
    pub neutral: f32,
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub fearful: f32,
    pub disgusted: f32,
    pub surprised: f32,
}

impl ExpressionScores {
    pub fn happy(score: f32) -> Self {
        Self {
            happy: score,
            neutral: (1.0 - score).max(0.0),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bounding_box: BoundingBox,
    pub expressions: ExpressionScores,
}

/// Anything that can find faces and score their expressions
#[async_trait::async_trait]
pub trait FaceEstimator: Send + Sync {
    /// Models are loaded and estimates can be requested
    fn is_ready(&self) -> bool;

    /// Detect faces in `frame`; an empty vec means no face was found
    async fn estimate(&self, frame: &FrameData) -> Result<Vec<FaceDetection>, EstimatorError>;
}

/// Reduce an estimate to the controller's input: the first face's happy score.
pub fn sample_from_estimate(result: Result<Vec<FaceDetection>, EstimatorError>) -> Sample {
    match result {
        Ok(detections) => match detections.first() {
            Some(face) if face.expressions.happy.is_nan() => {
                Sample::Failed("estimator returned NaN happiness".to_string())
            }
            Some(face) => Sample::Happiness(face.expressions.happy.clamp(0.0, 1.0)),
            None => Sample::NoFace,
        },
        Err(e) => Sample::Failed(e.to_string()),
    }
}

/// One scripted estimator reply
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Face(f32),
    NoFace,
    Fail,
}

/// Estimator that replays a fixed sequence of replies, one per call.
///
/// Once the script is exhausted the last step repeats; an empty script never
/// finds a face.
pub struct ScriptedEstimator {
    steps: Vec<ScriptStep>,
    cursor: Mutex<usize>,
    ready: AtomicBool,
}

impl ScriptedEstimator {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            cursor: Mutex::new(0),
            ready: AtomicBool::new(true),
        }
    }

    /// Parse a comma separated script such as `0.2,0.97,none,fail`
    pub fn parse(script: &str) -> Result<Self, EstimatorError> {
        let steps = script
            .split(',')
            .map(str::trim)
            .filter(|step| !step.is_empty())
            .map(|step| match step.to_ascii_lowercase().as_str() {
                "none" | "noface" | "-" => Ok(ScriptStep::NoFace),
                "fail" | "error" => Ok(ScriptStep::Fail),
                value => value
                    .parse::<f32>()
                    .map(ScriptStep::Face)
                    .map_err(|_| EstimatorError::Backend {
                        details: format!("invalid script step '{}'", step),
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(steps))
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of estimates served so far
    pub fn calls(&self) -> usize {
        *self.cursor.lock()
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let mut cursor = self.cursor.lock();
        let index = (*cursor).min(self.steps.len().saturating_sub(1));
        *cursor += 1;
        self.steps.get(index).cloned()
    }
}

#[async_trait::async_trait]
impl FaceEstimator for ScriptedEstimator {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn estimate(&self, frame: &FrameData) -> Result<Vec<FaceDetection>, EstimatorError> {
        if !self.is_ready() {
            return Err(EstimatorError::NotReady);
        }
        if frame.validate_size().is_err() {
            return Err(EstimatorError::MalformedFrame {
                details: format!("frame {} has {} bytes", frame.id, frame.data.len()),
            });
        }

        let step = self.next_step();
        debug!("Scripted estimate for frame {}: {:?}", frame.id, step);

        match step {
            Some(ScriptStep::Face(score)) => Ok(vec![FaceDetection {
                bounding_box: BoundingBox {
                    x: frame.width as f32 * 0.25,
                    y: frame.height as f32 * 0.25,
                    width: frame.width as f32 * 0.5,
                    height: frame.height as f32 * 0.5,
                },
                expressions: ExpressionScores::happy(score),
            }]),
            Some(ScriptStep::NoFace) | None => Ok(Vec::new()),
            Some(ScriptStep::Fail) => Err(EstimatorError::Backend {
                details: "scripted failure".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn frame() -> FrameData {
        FrameData::new(7, SystemTime::now(), vec![0u8; 4 * 4 * 3], 4, 4)
    }

    fn face(happy: f32) -> FaceDetection {
        FaceDetection {
            bounding_box: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
            },
            expressions: ExpressionScores::happy(happy),
        }
    }

    #[test]
    fn test_only_first_face_counts() {
        let sample = sample_from_estimate(Ok(vec![face(0.3), face(0.99)]));
        assert_eq!(sample, Sample::Happiness(0.3));
    }

    #[test]
    fn test_sample_mapping() {
        assert_eq!(sample_from_estimate(Ok(Vec::new())), Sample::NoFace);
        assert_eq!(
            sample_from_estimate(Ok(vec![face(1.7)])),
            Sample::Happiness(1.0)
        );
        assert!(matches!(
            sample_from_estimate(Err(EstimatorError::MalformedFrame {
                details: "truncated".to_string()
            })),
            Sample::Failed(_)
        ));
        assert!(matches!(
            sample_from_estimate(Ok(vec![face(f32::NAN)])),
            Sample::Failed(_)
        ));
    }

    #[test]
    fn test_parse_script() {
        let estimator = ScriptedEstimator::parse("0.2, 0.97,none,FAIL").unwrap();
        assert_eq!(
            estimator.steps,
            vec![
                ScriptStep::Face(0.2),
                ScriptStep::Face(0.97),
                ScriptStep::NoFace,
                ScriptStep::Fail
            ]
        );
        assert!(ScriptedEstimator::parse("0.5,smile").is_err());
    }

    #[tokio::test]
    async fn test_scripted_replies_then_repeats_last() {
        let estimator = ScriptedEstimator::parse("none,0.9").unwrap();
        let frame = frame();

        assert!(estimator.estimate(&frame).await.unwrap().is_empty());
        for _ in 0..3 {
            let faces = estimator.estimate(&frame).await.unwrap();
            assert_eq!(faces[0].expressions.happy, 0.9);
        }
        assert_eq!(estimator.calls(), 4);
    }

    #[tokio::test]
    async fn test_not_ready_and_malformed_frames_fail() {
        let estimator = ScriptedEstimator::parse("0.9").unwrap();
        estimator.set_ready(false);
        assert_eq!(
            estimator.estimate(&frame()).await,
            Err(EstimatorError::NotReady)
        );

        estimator.set_ready(true);
        let broken = FrameData::new(8, SystemTime::now(), vec![0u8; 5], 4, 4);
        assert!(matches!(
            estimator.estimate(&broken).await,
            Err(EstimatorError::MalformedFrame { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_script_never_finds_a_face() {
        let estimator = ScriptedEstimator::new(Vec::new());
        assert!(estimator.estimate(&frame()).await.unwrap().is_empty());
    }
}
