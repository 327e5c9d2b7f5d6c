//! Behavioral persona clustering.
//!
//! Residents are clustered once per run on a representative snapshot:
//! one feature row per participant (not per participant-month, which
//! would bias the fit toward long-tenured residents). The assignment is
//! fixed per participant for the whole observed period and propagated
//! to every monthly row.
//!
//! Determinism:
//!   - all randomness comes from one Pcg64Mcg stream seeded from config;
//!   - cluster ids are canonicalized post-fit by ascending centroid mean
//!     income, so id 0 always denotes the lowest-income persona across
//!     reruns regardless of k-means' internal label order.

use crate::config::ClusterConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::features::ResidentMonthlyMetric;
use crate::raw::EducationLevel;
use crate::types::ParticipantId;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Denormalized centroid of one persona, for profile display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCentroid {
    pub have_kids_share: f64,
    pub household_size: f64,
    pub income: f64,
    pub cost_of_living: f64,
    pub savings_rate: f64,
    /// Member shares per education level, in `EducationLevel::ALL` order.
    pub education_shares: [f64; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster_id: u32,
    pub label: String,
    pub member_count: u32,
    pub centroid: ClusterCentroid,
}

#[derive(Debug)]
pub struct ClusterOutcome {
    pub profiles: Vec<ClusterProfile>,
    pub assignments: HashMap<ParticipantId, u32>,
    /// True when fewer usable residents than k forced a reduction.
    pub degraded: bool,
    pub effective_k: usize,
}

/// One representative feature row per participant.
struct Snapshot {
    participant_id: ParticipantId,
    have_kids: f64,
    household_size: f64,
    income: f64,
    cost_of_living: f64,
    savings_rate: f64,
    education: EducationLevel,
}

impl Snapshot {
    const DIMS: usize = 9;

    fn vector(&self) -> [f64; Self::DIMS] {
        let mut v = [0.0; Self::DIMS];
        v[0] = self.have_kids;
        v[1] = self.household_size;
        v[2] = self.income;
        v[3] = self.cost_of_living;
        v[4] = self.savings_rate;
        v[5 + self.education.one_hot_index()] = 1.0;
        v
    }
}

pub struct ClusterAssigner {
    cfg: ClusterConfig,
}

impl ClusterAssigner {
    pub fn new(cfg: ClusterConfig) -> Self {
        Self { cfg }
    }

    /// Fit personas and write the assignment into every monthly row.
    /// Participants without a single defined savings rate stay
    /// unclustered rather than being imputed into a persona.
    pub fn assign(&self, residents: &mut [ResidentMonthlyMetric]) -> PipelineResult<ClusterOutcome> {
        let snapshots = build_snapshots(residents);
        let usable = snapshots.len();
        if usable == 0 {
            return Err(PipelineError::DegenerateClustering {
                requested: self.cfg.k,
                usable,
            });
        }

        let mut effective_k = self.cfg.k;
        let mut degraded = false;
        if usable < self.cfg.k {
            effective_k = usable;
            degraded = true;
            log::warn!(
                "degenerate clustering: {usable} usable residents < k={}, reducing to k={effective_k}",
                self.cfg.k
            );
        }

        // Z-score normalization per dimension; zero-variance axes stay 0.
        let raw: Vec<[f64; Snapshot::DIMS]> = snapshots.iter().map(Snapshot::vector).collect();
        let points = normalize(&raw);

        let mut rng = Pcg64Mcg::seed_from_u64(self.cfg.seed);
        let labels = kmeans(&points, effective_k, self.cfg.max_iterations, &mut rng);

        // Canonical ids: ascending mean raw income.
        let remap = canonical_order(&snapshots, &labels, effective_k);

        let mut assignments: HashMap<ParticipantId, u32> = HashMap::new();
        for (snapshot, label) in snapshots.iter().zip(&labels) {
            assignments.insert(snapshot.participant_id.clone(), remap[*label]);
        }
        for row in residents.iter_mut() {
            row.cluster = assignments.get(&row.participant_id).copied();
        }

        let profiles = build_profiles(&snapshots, &assignments, effective_k);
        Ok(ClusterOutcome {
            profiles,
            assignments,
            degraded,
            effective_k,
        })
    }
}

fn build_snapshots(residents: &[ResidentMonthlyMetric]) -> Vec<Snapshot> {
    struct Acc {
        income: f64,
        cost: f64,
        savings: f64,
        savings_n: u32,
        months: u32,
        have_kids: bool,
        household_size: u32,
        education: EducationLevel,
    }

    let mut by_participant: BTreeMap<&ParticipantId, Acc> = BTreeMap::new();
    for row in residents {
        let acc = by_participant.entry(&row.participant_id).or_insert(Acc {
            income: 0.0,
            cost: 0.0,
            savings: 0.0,
            savings_n: 0,
            months: 0,
            have_kids: row.have_kids,
            household_size: row.household_size,
            education: row.education_level,
        });
        acc.income += row.income;
        acc.cost += row.cost_of_living;
        acc.months += 1;
        if let Some(rate) = row.savings_rate {
            acc.savings += rate;
            acc.savings_n += 1;
        }
    }

    by_participant
        .into_iter()
        .filter(|(_, acc)| acc.savings_n > 0)
        .map(|(pid, acc)| Snapshot {
            participant_id: pid.clone(),
            have_kids: if acc.have_kids { 1.0 } else { 0.0 },
            household_size: acc.household_size as f64,
            income: acc.income / acc.months as f64,
            cost_of_living: acc.cost / acc.months as f64,
            savings_rate: acc.savings / acc.savings_n as f64,
            education: acc.education,
        })
        .collect()
}

fn normalize(raw: &[[f64; Snapshot::DIMS]]) -> Vec<[f64; Snapshot::DIMS]> {
    let n = raw.len() as f64;
    let mut mean = [0.0; Snapshot::DIMS];
    for point in raw {
        for d in 0..Snapshot::DIMS {
            mean[d] += point[d];
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut std = [0.0; Snapshot::DIMS];
    for point in raw {
        for d in 0..Snapshot::DIMS {
            std[d] += (point[d] - mean[d]).powi(2);
        }
    }
    for s in &mut std {
        *s = (*s / n).sqrt();
    }

    raw.iter()
        .map(|point| {
            let mut out = [0.0; Snapshot::DIMS];
            for d in 0..Snapshot::DIMS {
                out[d] = if std[d] > 1e-12 {
                    (point[d] - mean[d]) / std[d]
                } else {
                    0.0
                };
            }
            out
        })
        .collect()
}

fn dist_sq(a: &[f64; Snapshot::DIMS], b: &[f64; Snapshot::DIMS]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Lloyd's algorithm with k-means++ seeding.
fn kmeans(
    points: &[[f64; Snapshot::DIMS]],
    k: usize,
    max_iterations: usize,
    rng: &mut Pcg64Mcg,
) -> Vec<usize> {
    let n = points.len();
    debug_assert!(k >= 1 && k <= n);

    // k-means++ init.
    let mut centroids: Vec<[f64; Snapshot::DIMS]> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..n)]);
    while centroids.len() < k {
        let d2: Vec<f64> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| dist_sq(p, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = d2.iter().sum();
        let next = if total <= 0.0 {
            // All remaining points coincide with a centroid.
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, w) in d2.iter().enumerate() {
                target -= w;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centroids.push(points[next]);
    }

    let mut labels = vec![0usize; n];
    for _ in 0..max_iterations {
        // Assignment step.
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let mut best = 0;
            let mut best_d = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = dist_sq(point, centroid);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            if labels[i] != best {
                labels[i] = best;
                changed = true;
            }
        }

        // Update step.
        let mut sums = vec![[0.0; Snapshot::DIMS]; k];
        let mut counts = vec![0usize; k];
        for (point, label) in points.iter().zip(&labels) {
            counts[*label] += 1;
            for d in 0..Snapshot::DIMS {
                sums[*label][d] += point[d];
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                // Re-seed an empty cluster with the point farthest from
                // its current centroid.
                let far = points
                    .iter()
                    .enumerate()
                    .max_by(|(i, p), (j, q)| {
                        let di = dist_sq(p, &centroids[labels[*i]]);
                        let dj = dist_sq(q, &centroids[labels[*j]]);
                        di.partial_cmp(&dj).expect("non-NaN distance")
                    })
                    .map(|(i, _)| i)
                    .expect("non-empty point set");
                centroids[c] = points[far];
            } else {
                for d in 0..Snapshot::DIMS {
                    centroids[c][d] = sums[c][d] / counts[c] as f64;
                }
            }
        }

        if !changed {
            break;
        }
    }

    labels
}

/// Map internal k-means labels to canonical ids by ascending mean raw
/// income. `remap[internal_label] = canonical_id`.
fn canonical_order(snapshots: &[Snapshot], labels: &[usize], k: usize) -> Vec<u32> {
    let mut income_sum = vec![0.0; k];
    let mut counts = vec![0u32; k];
    for (snapshot, label) in snapshots.iter().zip(labels) {
        income_sum[*label] += snapshot.income;
        counts[*label] += 1;
    }

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|a, b| {
        let ma = if counts[*a] > 0 {
            income_sum[*a] / counts[*a] as f64
        } else {
            f64::INFINITY
        };
        let mb = if counts[*b] > 0 {
            income_sum[*b] / counts[*b] as f64
        } else {
            f64::INFINITY
        };
        ma.partial_cmp(&mb)
            .expect("non-NaN income")
            .then(a.cmp(b))
    });

    let mut remap = vec![0u32; k];
    for (canonical, internal) in order.into_iter().enumerate() {
        remap[internal] = canonical as u32;
    }
    remap
}

fn build_profiles(
    snapshots: &[Snapshot],
    assignments: &HashMap<ParticipantId, u32>,
    k: usize,
) -> Vec<ClusterProfile> {
    let mut profiles = Vec::with_capacity(k);
    for cluster_id in 0..k as u32 {
        let members: Vec<&Snapshot> = snapshots
            .iter()
            .filter(|s| assignments.get(&s.participant_id) == Some(&cluster_id))
            .collect();
        let n = members.len().max(1) as f64;

        let mut education_shares = [0.0; 4];
        for member in &members {
            education_shares[member.education.one_hot_index()] += 1.0 / n;
        }

        profiles.push(ClusterProfile {
            cluster_id,
            label: persona_label(cluster_id, k),
            member_count: members.len() as u32,
            centroid: ClusterCentroid {
                have_kids_share: members.iter().map(|m| m.have_kids).sum::<f64>() / n,
                household_size: members.iter().map(|m| m.household_size).sum::<f64>() / n,
                income: members.iter().map(|m| m.income).sum::<f64>() / n,
                cost_of_living: members.iter().map(|m| m.cost_of_living).sum::<f64>() / n,
                savings_rate: members.iter().map(|m| m.savings_rate).sum::<f64>() / n,
                education_shares,
            },
        });
    }
    profiles
}

/// Human-readable persona names, stable because ids are income-ordered.
fn persona_label(cluster_id: u32, k: usize) -> String {
    if k == 3 {
        match cluster_id {
            0 => "Constrained budgets".into(),
            1 => "Steady mid-income".into(),
            _ => "Affluent savers".into(),
        }
    } else {
        format!("Persona {cluster_id}")
    }
}
