use serde::{Deserialize, Serialize};

/// Outdoor temperatures (°C) at which the curve is calibrated.
pub const COP_KNOTS_C: [f64; 5] = [-15.0, -7.0, 0.0, 7.0, 15.0];

/// Smallest efficiency ever used as a divisor.
pub const MIN_DIVISOR_COP: f64 = 0.1;

/// Heat-pump efficiency at the five calibration temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopCurve {
    pub cop_m15: f64,
    pub cop_m7: f64,
    pub cop_0: f64,
    pub cop_7: f64,
    pub cop_15: f64,
}

impl Default for CopCurve {
    fn default() -> Self {
        Self {
            cop_m15: 2.0,
            cop_m7: 2.5,
            cop_0: 3.2,
            cop_7: 4.0,
            cop_15: 5.0,
        }
    }
}

impl CopCurve {
    pub fn points(&self) -> [(f64, f64); 5] {
        [
            (COP_KNOTS_C[0], self.cop_m15),
            (COP_KNOTS_C[1], self.cop_m7),
            (COP_KNOTS_C[2], self.cop_0),
            (COP_KNOTS_C[3], self.cop_7),
            (COP_KNOTS_C[4], self.cop_15),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.points().iter().all(|(_, y)| y.is_finite())
    }

    /// Piecewise-linear efficiency at `outside_c`, clamped to the end points.
    pub fn interpolate(&self, outside_c: f64) -> f64 {
        let points = self.points();
        let (first_x, first_y) = points[0];
        let (last_x, last_y) = points[points.len() - 1];

        if outside_c <= first_x {
            return first_y;
        }
        if outside_c >= last_x {
            return last_y;
        }

        // Half-open windows: a knot always starts its window, so it is exact.
        points
            .windows(2)
            .find(|pair| outside_c < pair[1].0)
            .map(|pair| {
                let (x1, y1) = pair[0];
                let (x2, y2) = pair[1];
                y1 + (outside_c - x1) * (y2 - y1) / (x2 - x1)
            })
            .unwrap_or(last_y)
    }

    /// Efficiency safe to divide by.
    pub fn divisor(&self, outside_c: f64) -> f64 {
        let cop = self.interpolate(outside_c);
        if cop.is_nan() {
            MIN_DIVISOR_COP
        } else {
            cop.max(MIN_DIVISOR_COP)
        }
    }
}

/// Cost of one kWh of heat delivered by the heat pump.
pub fn heat_pump_cost_per_kwh(electricity_price: f64, curve: &CopCurve, outside_c: f64) -> f64 {
    electricity_price / curve.divisor(outside_c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn clamps_outside_calibrated_range() {
        let curve = CopCurve::default();
        for t in [-40.0, -20.0, -15.0] {
            assert_eq!(curve.interpolate(t), 2.0);
        }
        for t in [15.0, 22.5, 40.0] {
            assert_eq!(curve.interpolate(t), 5.0);
        }
    }

    #[test]
    fn knots_are_exact() {
        let curve = CopCurve::default();
        assert_eq!(curve.interpolate(-7.0), 2.5);
        assert_eq!(curve.interpolate(0.0), 3.2);
        assert_eq!(curve.interpolate(7.0), 4.0);
    }

    #[test]
    fn interpolates_between_knots() {
        let curve = CopCurve::default();
        assert!(close(curve.interpolate(-11.0), 2.25));
        assert!(close(curve.interpolate(11.0), 4.5));
        assert!(close(curve.interpolate(3.5), 3.6));
    }

    #[test]
    fn divisor_never_drops_below_floor() {
        let curve = CopCurve {
            cop_m15: 0.0,
            cop_m7: -1.0,
            ..CopCurve::default()
        };
        assert_eq!(curve.divisor(-20.0), MIN_DIVISOR_COP);
        assert_eq!(curve.divisor(-7.0), MIN_DIVISOR_COP);
        assert!(close(heat_pump_cost_per_kwh(0.2, &curve, -15.0), 2.0));
    }

    #[test]
    fn cost_uses_interpolated_cop() {
        let curve = CopCurve::default();
        assert!(close(heat_pump_cost_per_kwh(0.20, &curve, 7.0), 0.05));
    }
}
