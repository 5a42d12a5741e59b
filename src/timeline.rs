use crate::{
    error::{EngineResult, RenderError},
    model::{AssetClip, Transition, TransitionKind},
};

/// Segments are never reconciled below this length, in seconds.
pub const MIN_SEGMENT_SEC: f64 = 0.1;

/// The canonical, contiguous, time-ordered segment list derived from a
/// [`crate::RenderRequest`]. Built exactly once per render and shared by
/// every downstream stage.
#[derive(Clone, Debug, PartialEq)]
pub struct Timeline {
    pub segments: Vec<TimelineSegment>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimelineSegment {
    pub asset_index: usize,
    pub start: f64,
    pub end: f64,
    /// Blend window into the next segment, centered on this segment's end
    /// boundary. Half the window is carved from this segment's trailing
    /// portion, half from the next segment's leading portion.
    pub transition_out: Option<Transition>,
}

impl TimelineSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// What is visible at one instant of timeline time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameSample {
    /// A single asset fills the frame.
    Single { asset_index: usize },
    /// Two assets blend during a transition window.
    Blend {
        outgoing: usize,
        incoming: usize,
        kind: TransitionKind,
        /// Progress within the window, 0 at window start, 1 at window end.
        progress: f64,
    },
}

impl Timeline {
    /// Build the timeline per the duration/transition rules:
    ///
    /// - each asset gets a base interval of its display duration;
    /// - a configured transition is clamped to the shorter of the two
    ///   adjacent intervals (after validation) and blended in a window
    ///   centered on the shared boundary;
    /// - when the naive sum exceeds `max_total_duration`, every interval
    ///   is shrunk by `max / naive_sum` and the accumulated rounding error
    ///   is folded into the last segment so the total is exact, with a
    ///   floor of [`MIN_SEGMENT_SEC`] per segment.
    pub fn build(
        assets: &[AssetClip],
        transition: Option<Transition>,
        max_total_duration: Option<f64>,
    ) -> EngineResult<Timeline> {
        if assets.is_empty() {
            return Err(RenderError::validation(
                "timeline requires at least one asset",
            ));
        }
        for (i, asset) in assets.iter().enumerate() {
            if !asset.display_duration.is_finite() || asset.display_duration <= 0.0 {
                return Err(RenderError::validation(format!(
                    "asset {i} display_duration must be finite and > 0"
                )));
            }
        }
        if let Some(tr) = &transition {
            if !tr.duration.is_finite() || tr.duration < 0.0 {
                return Err(RenderError::validation(
                    "transition duration must be finite and >= 0",
                ));
            }
        }

        let mut durations: Vec<f64> = assets.iter().map(|a| a.display_duration).collect();

        if let Some(max) = max_total_duration {
            if !max.is_finite() || max <= 0.0 {
                return Err(RenderError::validation(
                    "max_total_duration must be finite and > 0",
                ));
            }
            let naive: f64 = durations.iter().sum();
            if naive > max {
                reconcile(&mut durations, max)?;
            }
        }

        let mut segments = Vec::with_capacity(durations.len());
        let mut cursor = 0.0f64;
        for (i, &dur) in durations.iter().enumerate() {
            let transition_out = match (&transition, durations.get(i + 1)) {
                (Some(tr), Some(&next)) if tr.duration > 0.0 => Some(Transition {
                    kind: tr.kind,
                    duration: tr.duration.min(dur).min(next),
                }),
                _ => None,
            };
            segments.push(TimelineSegment {
                asset_index: i,
                start: cursor,
                end: cursor + dur,
                transition_out,
            });
            cursor += dur;
        }

        Ok(Timeline { segments })
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }

    pub fn frame_count(&self, frame_rate: u32) -> u64 {
        (self.total_duration() * f64::from(frame_rate)).round() as u64
    }

    /// Segment containing time `t` (`[start, end)`; the final segment also
    /// owns its end point).
    pub fn segment_at(&self, t: f64) -> Option<&TimelineSegment> {
        if self.segments.is_empty() {
            return None;
        }
        let last = self.segments.len() - 1;
        self.segments
            .iter()
            .enumerate()
            .find(|(i, s)| (t >= s.start && t < s.end) || (*i == last && t >= s.start && t <= s.end))
            .map(|(_, s)| s)
    }

    /// Resolve what is visible at time `t`, including transition blends.
    pub fn sample(&self, t: f64) -> Option<FrameSample> {
        // Blend windows straddle segment boundaries, so check them first.
        for (i, seg) in self.segments.iter().enumerate() {
            let Some(tr) = &seg.transition_out else {
                continue;
            };
            let half = tr.duration / 2.0;
            let window_start = seg.end - half;
            let window_end = seg.end + half;
            if t >= window_start && t < window_end {
                return Some(FrameSample::Blend {
                    outgoing: seg.asset_index,
                    incoming: self.segments[i + 1].asset_index,
                    kind: tr.kind,
                    progress: ((t - window_start) / tr.duration).clamp(0.0, 1.0),
                });
            }
        }

        self.segment_at(t).map(|s| FrameSample::Single {
            asset_index: s.asset_index,
        })
    }
}

fn reconcile(durations: &mut [f64], max: f64) -> EngineResult<()> {
    let floor_total = MIN_SEGMENT_SEC * durations.len() as f64;
    if floor_total > max + 1e-9 {
        return Err(RenderError::validation(format!(
            "max_total_duration {max}s cannot fit {} segments above the {MIN_SEGMENT_SEC}s floor",
            durations.len()
        )));
    }

    let naive: f64 = durations.iter().sum();
    let scale = max / naive;
    for d in durations.iter_mut() {
        *d = (*d * scale).max(MIN_SEGMENT_SEC);
    }

    // Flooring can only push the sum above `max`; take the excess back from
    // the segments that still have slack, proportionally to that slack. The
    // feasibility check above guarantees the slack covers the excess.
    let sum: f64 = durations.iter().sum();
    let excess = sum - max;
    let slack: f64 = durations.iter().map(|d| d - MIN_SEGMENT_SEC).sum();
    if excess > 0.0 && slack > 0.0 {
        for d in durations.iter_mut() {
            *d -= excess * (*d - MIN_SEGMENT_SEC) / slack;
        }
    }

    // Fold the residual float error into the widest segment so the
    // reconciled sum equals `max` exactly.
    let sum: f64 = durations.iter().sum();
    let widest = durations
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .expect("non-empty durations");
    durations[widest] += max - sum;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn clips(durations: &[f64]) -> Vec<AssetClip> {
        durations
            .iter()
            .enumerate()
            .map(|(i, &d)| AssetClip {
                source: PathBuf::from(format!("img{i}.png")),
                display_duration: d,
            })
            .collect()
    }

    fn fade(duration: f64) -> Option<Transition> {
        Some(Transition {
            kind: TransitionKind::Fade,
            duration,
        })
    }

    #[test]
    fn segments_are_contiguous_and_cover_total() {
        let tl = Timeline::build(&clips(&[2.0, 2.0, 2.0]), None, None).unwrap();
        assert_eq!(tl.segments.len(), 3);
        assert_eq!(tl.segments[0].start, 0.0);
        for pair in tl.segments.windows(2) {
            assert!((pair[0].end - pair[1].start).abs() < 1e-12);
        }
        assert!((tl.total_duration() - 6.0).abs() < 1e-12);
        assert_eq!(tl.frame_count(30), 180);
    }

    #[test]
    fn transition_clamps_to_shorter_neighbor() {
        let tl = Timeline::build(&clips(&[5.0, 0.5, 5.0]), fade(2.0), None).unwrap();
        let t0 = tl.segments[0].transition_out.unwrap();
        let t1 = tl.segments[1].transition_out.unwrap();
        assert!((t0.duration - 0.5).abs() < 1e-12);
        assert!((t1.duration - 0.5).abs() < 1e-12);
        assert!(tl.segments[2].transition_out.is_none());
    }

    #[test]
    fn zero_duration_transition_is_dropped() {
        let tl = Timeline::build(&clips(&[1.0, 1.0]), fade(0.0), None).unwrap();
        assert!(tl.segments[0].transition_out.is_none());
    }

    #[test]
    fn negative_transition_rejected_before_clamping() {
        assert!(Timeline::build(&clips(&[1.0, 1.0]), fade(-1.0), None).is_err());
    }

    #[test]
    fn reconciliation_is_exact_with_error_in_last_segment() {
        let tl = Timeline::build(&clips(&[3.0, 3.0, 3.0]), None, Some(7.0)).unwrap();
        assert!((tl.total_duration() - 7.0).abs() < 1e-12);
        for seg in &tl.segments {
            assert!(seg.duration() >= MIN_SEGMENT_SEC);
        }
        // Uniform shrink: first two are 7/3, the last absorbs the residue.
        assert!((tl.segments[0].duration() - 7.0 / 3.0).abs() < 1e-9);
        assert!((tl.segments[1].duration() - 7.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn reconciliation_respects_floor() {
        let tl = Timeline::build(&clips(&[10.0, 0.11]), None, Some(1.0)).unwrap();
        assert!((tl.total_duration() - 1.0).abs() < 1e-12);
        assert!(tl.segments[1].duration() >= MIN_SEGMENT_SEC - 1e-12);
    }

    #[test]
    fn floored_segments_take_their_deficit_from_segments_with_slack() {
        // Scaling [10.0, 0.11] to 1s floors the second segment to 0.1; the
        // overshoot must come out of the first segment, not fail the build.
        let tl = Timeline::build(&clips(&[10.0, 0.11]), None, Some(1.0)).unwrap();
        assert!((tl.segments[0].duration() - 0.9).abs() < 1e-9);
        assert!((tl.segments[1].duration() - 0.1).abs() < 1e-9);
        assert!((tl.total_duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cap_equal_to_the_floor_total_pins_every_segment() {
        let tl = Timeline::build(&clips(&[5.0, 0.01]), None, Some(0.2)).unwrap();
        assert!((tl.segments[0].duration() - 0.1).abs() < 1e-9);
        assert!((tl.segments[1].duration() - 0.1).abs() < 1e-9);
        assert!((tl.total_duration() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn reconciliation_fails_when_floor_cannot_fit() {
        // 20 segments * 0.1s floor > 1.0s cap.
        let durs: Vec<f64> = vec![5.0; 20];
        assert!(Timeline::build(&clips(&durs), None, Some(1.0)).is_err());
    }

    #[test]
    fn identical_builds_compare_equal() {
        let a = Timeline::build(&clips(&[2.0, 2.0]), fade(1.0), None).unwrap();
        let b = Timeline::build(&clips(&[2.0, 2.0]), fade(1.0), None).unwrap();
        assert_eq!(a, b);
        let c = Timeline::build(&clips(&[2.0, 2.0]), fade(0.5), None).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn no_reconciliation_when_under_cap() {
        let tl = Timeline::build(&clips(&[1.0, 1.0]), None, Some(10.0)).unwrap();
        assert!((tl.total_duration() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn sample_resolves_single_and_blend() {
        let tl = Timeline::build(&clips(&[2.0, 2.0]), fade(1.0), None).unwrap();
        assert_eq!(tl.sample(0.5), Some(FrameSample::Single { asset_index: 0 }));
        // Window is centered on the 2.0s boundary: [1.5, 2.5).
        match tl.sample(2.0) {
            Some(FrameSample::Blend {
                outgoing,
                incoming,
                progress,
                ..
            }) => {
                assert_eq!((outgoing, incoming), (0, 1));
                assert!((progress - 0.5).abs() < 1e-9);
            }
            other => panic!("expected blend at boundary, got {other:?}"),
        }
        assert_eq!(tl.sample(3.0), Some(FrameSample::Single { asset_index: 1 }));
        // The final instant belongs to the last segment.
        assert_eq!(tl.sample(4.0), Some(FrameSample::Single { asset_index: 1 }));
    }

    #[test]
    fn sample_out_of_range_is_none() {
        let tl = Timeline::build(&clips(&[1.0]), None, None).unwrap();
        assert!(tl.sample(1.5).is_none());
        assert!(tl.sample(-0.1).is_none());
    }
}
