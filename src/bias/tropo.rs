use crate::{geometry::GeodeticPos, prelude::Epoch};

/// Saastamoinen zenith delays (hydrostatic, wet) in meters, assuming
/// a standard atmosphere at the given geodetic position.
pub(crate) fn zenith_delays(pos: GeodeticPos, humidity: f64) -> (f64, f64) {
    let (lat, _, h) = pos;

    if !(-100.0..=1.0E4).contains(&h) {
        return (0.0, 0.0);
    }

    let hgt = h.max(0.0);

    // standard atmosphere
    let pres = 1013.25 * (1.0 - 2.2557E-5 * hgt).powf(5.2568);
    let temp = 15.0 - 6.5E-3 * hgt + 273.16;
    let e = 6.108 * humidity * ((17.15 * temp - 4684.0) / (temp - 38.45)).exp();

    let zhd = 0.0022768 * pres / (1.0 - 0.00266 * (2.0 * lat).cos() - 0.00028 * hgt / 1.0E3);
    let zwd = 0.002277 * (1255.0 / temp + 0.05) * e;

    (zhd, zwd)
}

/// Niell continued fraction form. Exactly 1 at zenith.
fn mapf(el: f64, a: f64, b: f64, c: f64) -> f64 {
    let sin_el = el.sin();
    (1.0 + a / (1.0 + b / (1.0 + c))) / (sin_el + a / (sin_el + b / (sin_el + c)))
}

fn interpc(coef: &[f64; 5], lat_deg: f64) -> f64 {
    let i = (lat_deg / 15.0) as usize;

    if i < 1 {
        coef[0]
    } else if i > 4 {
        coef[4]
    } else {
        let d = lat_deg / 15.0 - i as f64;
        coef[i - 1] * (1.0 - d) + coef[i] * d
    }
}

/// Niell mapping functions (hydrostatic, wet) at the given elevation
/// [rad]. Seasonal and latitude dependence of the coefficients, plus
/// the hydrostatic height correction.
pub(crate) fn niell_mapping(t: Epoch, pos: GeodeticPos, el: f64) -> (f64, f64) {
    const COEF: [[f64; 5]; 9] = [
        [1.2769934E-3, 1.2683230E-3, 1.2465397E-3, 1.2196049E-3, 1.2045996E-3],
        [2.9153695E-3, 2.9152299E-3, 2.9288445E-3, 2.9022565E-3, 2.9024912E-3],
        [62.610505E-3, 62.837393E-3, 63.721774E-3, 63.824265E-3, 64.258455E-3],
        [0.0, 1.2709626E-5, 2.6523662E-5, 3.4000452E-5, 4.1202191E-5],
        [0.0, 2.1414979E-5, 3.0160779E-5, 7.2562722E-5, 11.723375E-5],
        [0.0, 9.0128400E-5, 4.3497037E-5, 84.795348E-5, 170.37206E-5],
        [5.8021897E-4, 5.6794847E-4, 5.8118019E-4, 5.9727542E-4, 6.1641693E-4],
        [1.4275268E-3, 1.5138625E-3, 1.4572752E-3, 1.5007428E-3, 1.7599082E-3],
        [4.3472961E-2, 4.6729510E-2, 4.3908931E-2, 4.4626982E-2, 5.4736038E-2],
    ];

    let (lat, _, h) = pos;

    if el <= 0.0 {
        return (0.0, 0.0);
    }

    let lat_deg = lat.to_degrees();

    // seasonal term, shifted by half a year on the southern hemisphere
    let mut y = (t.day_of_year() - 28.0) / 365.25;
    if lat_deg < 0.0 {
        y += 0.5;
    }
    let cosy = (2.0 * std::f64::consts::PI * y).cos();

    let lat_abs = lat_deg.abs();

    let ah = [
        interpc(&COEF[0], lat_abs) - interpc(&COEF[3], lat_abs) * cosy,
        interpc(&COEF[1], lat_abs) - interpc(&COEF[4], lat_abs) * cosy,
        interpc(&COEF[2], lat_abs) - interpc(&COEF[5], lat_abs) * cosy,
    ];
    let aw = [
        interpc(&COEF[6], lat_abs),
        interpc(&COEF[7], lat_abs),
        interpc(&COEF[8], lat_abs),
    ];

    // height correction (hydrostatic only)
    let dm = (1.0 / el.sin() - mapf(el, 2.53E-5, 5.49E-3, 1.14E-3)) * h.max(0.0) / 1.0E3;

    (
        mapf(el, ah[0], ah[1], ah[2]) + dm,
        mapf(el, aw[0], aw[1], aw[2]),
    )
}

/// Slant wet delay modelled from the estimated states, with its partial
/// derivatives with respect to (zenith wet delay, north gradient, east
/// gradient). The gradient terms follow m = m_w·(1 + cot(el)·(Gn·cos(az)
/// + Ge·sin(az))).
pub(crate) fn wet_delay_with_gradients(
    t: Epoch,
    pos: GeodeticPos,
    azel: (f64, f64),
    zwd: f64,
    gradients: Option<(f64, f64)>,
) -> (f64, [f64; 3]) {
    let (az, el) = azel;
    let (_, mut m_w) = niell_mapping(t, pos, el);

    let mut dtdx = [0.0_f64; 3];

    if let Some((grad_n_state, grad_e_state)) = gradients {
        if el > 0.0 {
            let cotz = 1.0 / el.tan();
            let grad_n = m_w * cotz * az.cos();
            let grad_e = m_w * cotz * az.sin();

            m_w += grad_n * grad_n_state + grad_e * grad_e_state;
            dtdx[1] = grad_n * zwd;
            dtdx[2] = grad_e * zwd;
        }
    }

    dtdx[0] = m_w;
    (m_w * zwd, dtdx)
}
