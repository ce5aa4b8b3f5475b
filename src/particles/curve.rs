use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::particles::error::{ParticleError, Result};
use crate::particles::system::SystemId;

/// Single control point of a lifetime curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BezierPoint {
    /// Authoring time in [0, 1]
    pub x: f64,
    /// Curve value
    pub y: f64,
    /// Normalized position of a segment anchor. Untagged points act as
    /// inner control points of the segment they sit in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

impl BezierPoint {
    /// Inner control point
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            percentage: None,
        }
    }

    /// Segment anchor at `percentage`
    pub fn anchor(x: f64, y: f64, percentage: f64) -> Self {
        Self {
            x,
            y,
            percentage: Some(percentage),
        }
    }
}

/// Identity of an authored curve. Assigned once when the point list is
/// created; clones of the same [`BezierPoints`] share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurveId(u64);

static NEXT_CURVE_ID: AtomicU64 = AtomicU64::new(1);

impl CurveId {
    fn next() -> Self {
        Self(NEXT_CURVE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "curve#{}", self.0)
    }
}

/// Authored control-point list plus its cache handle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<BezierPoint>", into = "Vec<BezierPoint>")]
pub struct BezierPoints {
    id: CurveId,
    points: Arc<[BezierPoint]>,
}

impl BezierPoints {
    pub fn new(points: Vec<BezierPoint>) -> Self {
        Self {
            id: CurveId::next(),
            points: points.into(),
        }
    }

    /// Flat curve holding `value` over the whole lifetime
    pub fn flat(value: f64) -> Self {
        Self::new(vec![
            BezierPoint::anchor(0.0, value, 0.0),
            BezierPoint::anchor(1.0, value, 1.0),
        ])
    }

    pub fn id(&self) -> CurveId {
        self.id
    }

    pub fn points(&self) -> &[BezierPoint] {
        &self.points
    }
}

impl PartialEq for BezierPoints {
    fn eq(&self, other: &Self) -> bool {
        self.points == other.points
    }
}

impl From<Vec<BezierPoint>> for BezierPoints {
    fn from(points: Vec<BezierPoint>) -> Self {
        Self::new(points)
    }
}

impl From<BezierPoints> for Vec<BezierPoint> {
    fn from(points: BezierPoints) -> Self {
        points.points.to_vec()
    }
}

/// Compiled piecewise Bezier evaluator
#[derive(Debug)]
pub struct BezierCurve {
    points: Arc<[BezierPoint]>,
}

impl BezierCurve {
    /// Validate the control points and build an evaluator over them
    pub fn compile(points: &BezierPoints) -> Result<Self> {
        if points.points.is_empty() {
            return Err(ParticleError::EmptyBezierCurve);
        }

        let mut previous = f64::NEG_INFINITY;
        for (index, point) in points.points.iter().enumerate() {
            if let Some(percentage) = point.percentage {
                if percentage < previous {
                    return Err(ParticleError::InvalidCurveAnchors { index });
                }
                previous = percentage;
            }
        }

        Ok(Self {
            points: Arc::clone(&points.points),
        })
    }

    /// Evaluate the curve at `progress`. Values outside [0, 1] clamp to the
    /// first and last control point.
    pub fn evaluate(&self, progress: f64) -> f64 {
        let points = &self.points;
        let last = points.len() - 1;

        if progress < 0.0 {
            return points[0].y;
        }
        if progress > 1.0 {
            return points[last].y;
        }

        // Bracketing anchors: start is the last anchor at or before progress,
        // stop the first anchor after it
        let mut start = 0;
        let mut stop = last;
        for (index, point) in points.iter().enumerate() {
            if let Some(percentage) = point.percentage {
                if progress < percentage {
                    stop = index;
                    break;
                }
                start = index;
            }
        }

        let degree = stop.saturating_sub(start);
        if degree == 0 {
            return points[start].y;
        }

        let start_percentage = points[start].percentage.unwrap_or(0.0);
        let stop_percentage = points[stop].percentage.unwrap_or(1.0);
        let span = stop_percentage - start_percentage;
        let local = if span > 0.0 {
            ((progress - start_percentage) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };

        points[start..=stop]
            .iter()
            .enumerate()
            .map(|(i, point)| {
                binomial(degree, i)
                    * (1.0 - local).powi((degree - i) as i32)
                    * local.powi(i as i32)
                    * point.y
            })
            .sum()
    }

    pub fn points(&self) -> &[BezierPoint] {
        &self.points
    }
}

/// n choose k as a float, good enough for curve degrees
fn binomial(n: usize, k: usize) -> f64 {
    let mut result = 1.0;
    for i in 1..=k {
        result *= (n + 1 - i) as f64 / i as f64;
    }
    result
}

#[derive(Debug)]
struct CacheEntry {
    curve: Arc<BezierCurve>,
    referenced_by: Vec<SystemId>,
}

/// Shares compiled curves between particle systems authored from the same
/// point list. Entries are evicted once no system references them.
///
/// Owned by the caller (usually a `ParticleWorld`); stepping systems on
/// several threads needs the cache itself to stay on one.
#[derive(Debug, Default)]
pub struct CurveCache {
    entries: FxHashMap<CurveId, CacheEntry>,
}

impl CurveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the evaluator for `points`, compiling it on first use, and
    /// record `owner` as a referrer
    pub fn get_or_create(&mut self, owner: SystemId, points: &BezierPoints) -> Result<Arc<BezierCurve>> {
        if let Some(entry) = self.entries.get_mut(&points.id()) {
            if !entry.referenced_by.contains(&owner) {
                entry.referenced_by.push(owner);
            }
            return Ok(Arc::clone(&entry.curve));
        }

        let curve = Arc::new(BezierCurve::compile(points)?);
        log::debug!(
            "[CurveCache] Compiled {} ({} points) for {}",
            points.id(),
            points.points().len(),
            owner
        );

        self.entries.insert(
            points.id(),
            CacheEntry {
                curve: Arc::clone(&curve),
                referenced_by: vec![owner],
            },
        );

        Ok(curve)
    }

    /// Drop every reference held by `owner`, evicting orphaned entries.
    /// Returns the number of evicted curves.
    pub fn release(&mut self, owner: SystemId) -> usize {
        for entry in self.entries.values_mut() {
            entry.referenced_by.retain(|id| *id != owner);
        }

        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.referenced_by.is_empty());
        let evicted = before - self.entries.len();

        if evicted > 0 {
            log::debug!("[CurveCache] Released {}: evicted {} curves", owner, evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: CurveId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of systems referencing the curve, 0 when not cached
    pub fn reference_count(&self, id: CurveId) -> usize {
        self.entries
            .get(&id)
            .map_or(0, |entry| entry.referenced_by.len())
    }
}
