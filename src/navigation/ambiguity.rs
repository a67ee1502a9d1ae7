use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::{
    cfg::Config,
    constants::{MAXSAT, MAX_RATIO, VAR_HOLD_AMB},
    error::Error,
    navigation::{kalman, lambda, FilterState},
    observation::{sys_family, NUM_FAMILIES},
    track::{FixState, SatelliteTrack},
};

/// One (reference, other) ambiguity pair entering the integer search,
/// as indices in the full state layout
#[derive(Debug, Copy, Clone)]
struct AmbiguityPair {
    reference: usize,
    other: usize,
}

/// Integer ambiguity resolution outcome
pub(crate) struct ArOutcome {
    /// Ratio test value (2nd best / best squared norm)
    pub ratio: f64,
    /// The validated fixed solution, when the ratio test passed
    pub fixed: Option<FixedSolution>,
}

/// Integer constrained solution
pub(crate) struct FixedSolution {
    /// Full layout state, ambiguities constrained to integers
    pub xa: DVector<f64>,
    /// Covariance of the real (non ambiguity) states
    pub pa: DMatrix<f64>,
    /// Number of fixed double differenced ambiguities
    pub nb: usize,
}

/// True when this ambiguity may enter the integer search
fn fixable(track: &SatelliteTrack, cfg: &Config, family: usize) -> bool {
    let family_enabled = match family {
        1 => cfg.glo_ar,
        3 => cfg.bds_ar,
        _ => true,
    };

    family_enabled
        && track.lock > 0
        && track.slip & 2 == 0
        && track.azel.1 >= cfg.elmask_ar_rad()
}

/// Single to double difference transformation: one column per
/// (reference, other) ambiguity pair, identity over the real states.
/// The reference of each constellation family is its highest eligible
/// satellite. Updates the per satellite fix states.
fn single_to_double_transform(
    state: &FilterState,
    tracks: &mut [SatelliteTrack],
    cfg: &Config,
) -> (DMatrix<f64>, Vec<AmbiguityPair>) {
    let (nx, na) = (state.nx(), state.na());

    let mut pairs = Vec::<AmbiguityPair>::new();

    for track in tracks.iter_mut() {
        track.fix = FixState::None;
    }

    if state.amb_index(0).is_none() {
        return (DMatrix::<f64>::identity(nx, na), pairs);
    }

    for family in 0..NUM_FAMILIES {
        // reference: highest eligible satellite of this family
        let mut reference: Option<usize> = None;

        for slot in 0..MAXSAT {
            let i = state.amb_index(slot).unwrap();
            let track = &tracks[slot];
            let sv = match track.sv {
                Some(sv) => sv,
                None => continue,
            };

            if state.x[i] == 0.0
                || sys_family(sv.constellation) != Some(family)
                || !track.vsat
                || !track.half_valid
            {
                continue;
            }

            if fixable(track, cfg, family) {
                match reference {
                    Some(r) if tracks[r].azel.1 >= track.azel.1 => {},
                    _ => reference = Some(slot),
                }
            }
        }

        let reference_slot = match reference {
            Some(slot) => slot,
            None => continue,
        };
        tracks[reference_slot].fix = FixState::Fixed;

        for slot in 0..MAXSAT {
            if slot == reference_slot {
                continue;
            }

            let j = state.amb_index(slot).unwrap();
            let track = &tracks[slot];
            let sv = match track.sv {
                Some(sv) => sv,
                None => continue,
            };

            if state.x[j] == 0.0
                || sys_family(sv.constellation) != Some(family)
                || !track.vsat
            {
                continue;
            }

            if track.half_valid && fixable(track, cfg, family) {
                pairs.push(AmbiguityPair {
                    reference: state.amb_index(reference_slot).unwrap(),
                    other: j,
                });
                tracks[slot].fix = FixState::Fixed;
            } else {
                tracks[slot].fix = FixState::Float;
            }
        }
    }

    let nb = pairs.len();
    let mut d = DMatrix::<f64>::zeros(nx, na + nb);

    for i in 0..na {
        d[(i, i)] = 1.0;
    }

    for (col, pair) in pairs.iter().enumerate() {
        d[(pair.reference, na + col)] = 1.0;
        d[(pair.other, na + col)] = -1.0;
    }

    (d, pairs)
}

/// Integer ambiguity resolution by LAMBDA: transforms the float single
/// differenced ambiguities to double differences, searches the two
/// best integer candidates, applies the ratio test and back transforms
/// the accepted solution.
pub(crate) fn resolve(
    state: &FilterState,
    tracks: &mut [SatelliteTrack],
    cfg: &Config,
) -> Result<ArOutcome, Error> {
    let na = state.na();

    let (d, pairs) = single_to_double_transform(state, tracks, cfg);
    let nb = pairs.len();

    if nb == 0 {
        debug!("no valid double difference for AR");
        return Ok(ArOutcome {
            ratio: 0.0,
            fixed: None,
        });
    }

    // y = Dᵀ x, Qy = Dᵀ P D
    let y = d.transpose() * &state.x;
    let qy = d.transpose() * &state.p * &d;

    let y_b = y.rows(na, nb).clone_owned();
    let q_b = qy.view((na, na), (nb, nb)).clone_owned();
    let q_ab = qy.view((0, na), (na, nb)).clone_owned();

    let (b, s) = match lambda::lambda(nb, 2, &y_b, &q_b) {
        Ok(found) => found,
        Err(e) => {
            warn!("ambiguity search failed: {}", e);
            return Ok(ArOutcome {
                ratio: 0.0,
                fixed: None,
            });
        },
    };

    let mut ratio = if s[0] > 0.0 { s[1] / s[0] } else { 0.0 };
    if ratio > MAX_RATIO {
        ratio = MAX_RATIO;
    }

    // popular ratio test
    if s[0] > 0.0 && s[1] / s[0] < cfg.ar_ratio_threshold {
        warn!(
            "ambiguity validation failed (nb={} ratio={:.2})",
            nb, ratio
        );
        return Ok(ArOutcome { ratio, fixed: None });
    }

    let b_best = b.column(0).clone_owned();

    // xa = x - Qab Qb⁻¹ (b̂ - b)
    let q_b_inv = match q_b.try_inverse() {
        Some(inv) => inv,
        None => {
            warn!("ambiguity covariance inversion failed: float kept");
            return Ok(ArOutcome { ratio, fixed: None });
        },
    };

    let db = &q_b_inv * (y_b - &b_best);

    let mut xa_real = state.x.rows(0, na).clone_owned();
    xa_real -= &q_ab * db;

    // Pa = P - Qab Qb⁻¹ Qabᵀ
    let mut pa = state.p.view((0, 0), (na, na)).clone_owned();
    pa -= &q_ab * q_b_inv * q_ab.transpose();

    debug!("ambiguity validation ok (nb={} ratio={:.2})", nb, ratio);

    // restore the single differenced ambiguities: the reference keeps
    // its float value, every fixed satellite hangs from it
    let mut xa = state.x.clone();
    for i in 0..na {
        xa[i] = xa_real[i];
    }

    for (col, pair) in pairs.iter().enumerate() {
        xa[pair.other] = xa[pair.reference] - b_best[col];
    }

    Ok(ArOutcome {
        ratio,
        fixed: Some(FixedSolution { xa, pa, nb }),
    })
}

/// Feeds the validated integers back into the float state, as pseudo
/// measurements of the fixed double differences. Only ambiguities
/// above the hold elevation mask are committed.
pub(crate) fn hold(
    state: &mut FilterState,
    tracks: &mut [SatelliteTrack],
    cfg: &Config,
    xa: &DVector<f64>,
) -> Result<(), Error> {
    let nx = state.nx();

    let mut held = Vec::<usize>::new();

    for slot in 0..MAXSAT {
        let track = &mut tracks[slot];

        if track.fix != FixState::Fixed || track.azel.1 < cfg.elmask_hold_rad() {
            continue;
        }

        if let Some(i) = state.amb_index(slot) {
            held.push(i);
            track.fix = FixState::Held;
        }
    }

    if held.len() < 2 {
        return Ok(());
    }

    let nv = held.len() - 1;
    let mut v = DVector::<f64>::zeros(nv);
    let mut h = DMatrix::<f64>::zeros(nv, nx);

    // constrain every ambiguity to the first held one
    for (row, index) in held.iter().skip(1).enumerate() {
        v[row] = (xa[held[0]] - xa[*index]) - (state.x[held[0]] - state.x[*index]);
        h[(row, held[0])] = 1.0;
        h[(row, *index)] = -1.0;
    }

    let r = DMatrix::<f64>::identity(nv, nv) * VAR_HOLD_AMB;

    kalman::filter_update(state, &h, &v, &r, false)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        cfg::Config,
        prelude::{Constellation, SV},
        track::SatelliteTrack,
    };

    /// Three satellites tracked and fixable, slot 0 highest
    fn setup() -> (FilterState, Vec<SatelliteTrack>, Config) {
        let cfg = Config::static_preset((0.0, 0.0, 0.0));
        let mut state = FilterState::new(&cfg);
        let mut tracks = vec![SatelliteTrack::default(); MAXSAT];

        for i in 0..3 {
            state.init_component(i, 1.0E6, 0.01);
        }

        for (slot, (amb, el_deg)) in [(12.4, 70.0), (-3.6, 45.0), (25.2, 30.0)]
            .into_iter()
            .enumerate()
        {
            let i = state.amb_index(slot).unwrap();
            state.init_component(i, amb, 0.05);

            tracks[slot].sv = Some(SV::new(Constellation::GPS, slot as u8 + 1));
            tracks[slot].vsat = true;
            tracks[slot].half_valid = true;
            tracks[slot].lock = 5;
            tracks[slot].azel = (0.0, (el_deg as f64).to_radians());
        }

        (state, tracks, cfg)
    }

    #[test]
    fn transform_pairs_against_highest_reference() {
        let (state, mut tracks, cfg) = setup();
        let (d, pairs) = single_to_double_transform(&state, &mut tracks, &cfg);

        let na = state.na();
        assert_eq!(pairs.len(), 2);
        assert_eq!(d.ncols(), na + 2);

        // identity over the real states
        for i in 0..na {
            assert_eq!(d[(i, i)], 1.0);
        }

        // both pairs hang from slot 0 (highest elevation)
        let reference = state.amb_index(0).unwrap();
        for (col, pair) in pairs.iter().enumerate() {
            assert_eq!(pair.reference, reference);
            assert_eq!(d[(pair.reference, na + col)], 1.0);
            assert_eq!(d[(pair.other, na + col)], -1.0);
        }
    }

    #[test]
    fn transformed_covariance_matches_manual_form() {
        let (state, mut tracks, cfg) = setup();
        let (d, pairs) = single_to_double_transform(&state, &mut tracks, &cfg);

        let na = state.na();
        let qy = d.transpose() * &state.p * &d;

        for (col, pair) in pairs.iter().enumerate() {
            // DD of independent ambiguities: variances add up
            let manual = state.p[(pair.reference, pair.reference)]
                + state.p[(pair.other, pair.other)];
            assert!((qy[(na + col, na + col)] - manual).abs() < 1.0E-12);
        }

        // pairs share the reference: covariance equals its variance
        let reference = pairs[0].reference;
        assert!((qy[(na, na + 1)] - state.p[(reference, reference)]).abs() < 1.0E-12);
    }

    #[test]
    fn near_integer_float_state_is_fixed() {
        let (mut state, mut tracks, cfg) = setup();

        // float ambiguities a few hundredths away from integers
        for (slot, value) in [(0, 12.02), (1, -3.97), (2, 25.01)] {
            let i = state.amb_index(slot).unwrap();
            state.x[i] = value;
        }

        let outcome = resolve(&state, &mut tracks, &cfg).unwrap();
        let fixed = outcome.fixed.expect("should have resolved");

        assert_eq!(fixed.nb, 2);
        assert!(outcome.ratio >= cfg.ar_ratio_threshold);

        // double differences of the fixed state are exact integers
        let reference = state.amb_index(0).unwrap();
        for slot in 1..3 {
            let i = state.amb_index(slot).unwrap();
            let dd = fixed.xa[reference] - fixed.xa[i];
            assert!((dd - dd.round()).abs() < 1.0E-9);
        }
    }

    #[test]
    fn low_lock_satellites_are_left_out() {
        let (state, mut tracks, cfg) = setup();
        tracks[2].lock = -3;

        let (_, pairs) = single_to_double_transform(&state, &mut tracks, &cfg);
        assert_eq!(pairs.len(), 1);
        assert_eq!(tracks[2].fix, FixState::Float);
    }
}
