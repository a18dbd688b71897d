use serde::{Deserialize, Serialize};

/// One-dimensional tabulated data with optional errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Data1D {
    tag: String,
    x: Vec<f64>,
    values: Vec<f64>,
    errors: Option<Vec<f64>>,
}

impl Data1D {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    /// Create with the x axis of `template` and zeroed values.
    pub fn templated(tag: &str, template: &Data1D) -> Self {
        Self {
            tag: tag.to_string(),
            x: template.x.clone(),
            values: vec![0.0; template.x.len()],
            errors: None,
        }
    }

    /// Create over a regular axis `[x_min, x_max]` with the given step.
    pub fn regular(tag: &str, x_min: f64, x_step: f64, x_max: f64) -> Self {
        let mut data = Self::new(tag);
        let mut x = x_min;
        while x <= x_max + x_step * 1.0e-6 {
            data.add_point(x, 0.0);
            x += x_step;
        }
        data
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.tag = tag.to_string();
    }

    pub fn add_point(&mut self, x: f64, y: f64) {
        self.x.push(x);
        self.values.push(y);
    }

    pub fn add_point_with_error(&mut self, x: f64, y: f64, error: f64) {
        self.x.push(x);
        self.values.push(y);
        self.errors.get_or_insert_with(Vec::new).push(error);
    }

    pub fn n_values(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn x_axis(&self) -> &[f64] {
        &self.x
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn x(&self, i: usize) -> f64 {
        self.x[i]
    }

    pub fn value(&self, i: usize) -> f64 {
        self.values[i]
    }

    pub fn set_value(&mut self, i: usize, y: f64) {
        self.values[i] = y;
    }

    pub fn has_errors(&self) -> bool {
        self.errors.is_some()
    }

    pub fn errors(&self) -> Option<&[f64]> {
        self.errors.as_deref()
    }

    pub fn clear(&mut self) {
        self.x.clear();
        self.values.clear();
        self.errors = None;
    }

    pub fn zero(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn shift(&mut self, delta: f64) {
        self.values.iter_mut().for_each(|v| *v += delta);
    }

    pub fn scale(&mut self, factor: f64) {
        self.values.iter_mut().for_each(|v| *v *= factor);
        if let Some(errors) = &mut self.errors {
            errors.iter_mut().for_each(|e| *e *= factor.abs());
        }
    }

    /// Linear interpolation at `x`. Returns zero outside the axis range.
    pub fn interpolated(&self, x: f64) -> f64 {
        if self.x.is_empty() {
            return 0.0;
        }
        if x < self.x[0] || x > *self.x.last().unwrap() {
            return 0.0;
        }
        match self.x.binary_search_by(|probe| probe.total_cmp(&x)) {
            Ok(i) => self.values[i],
            Err(i) => {
                // i is the first index with x[i] > x; i >= 1 here
                let (x0, x1) = (self.x[i - 1], self.x[i]);
                let t = if x1 > x0 { (x - x0) / (x1 - x0) } else { 0.0 };
                self.values[i - 1] * (1.0 - t) + self.values[i] * t
            }
        }
    }

    /// Add `weight * source`, interpolating the source onto this axis. Points
    /// outside the source range are left untouched.
    pub fn add_interpolated(&mut self, source: &Data1D, weight: f64) {
        if source.is_empty() {
            return;
        }
        let (lo, hi) = (source.x[0], *source.x.last().unwrap());
        for i in 0..self.x.len() {
            let x = self.x[i];
            if x < lo || x > hi {
                continue;
            }
            self.values[i] += source.interpolated(x) * weight;
        }
    }

    /// Restrict to points with `x_min <= x <= x_max`.
    pub fn trim(&mut self, x_min: f64, x_max: f64) {
        let keep: Vec<usize> = (0..self.x.len())
            .filter(|&i| self.x[i] >= x_min && self.x[i] <= x_max)
            .collect();
        self.x = keep.iter().map(|&i| self.x[i]).collect();
        self.values = keep.iter().map(|&i| self.values[i]).collect();
        if let Some(errors) = &self.errors {
            self.errors = Some(keep.iter().map(|&i| errors[i]).collect());
        }
    }

    /// Trapezium-rule integral over the stored range.
    pub fn integral(&self) -> f64 {
        let mut sum = 0.0;
        for i in 1..self.x.len() {
            sum += 0.5 * (self.values[i] + self.values[i - 1]) * (self.x[i] - self.x[i - 1]);
        }
        sum
    }

    pub fn abs_integral(&self) -> f64 {
        let mut sum = 0.0;
        for i in 1..self.x.len() {
            sum += 0.5 * (self.values[i].abs() + self.values[i - 1].abs()) * (self.x[i] - self.x[i - 1]);
        }
        sum
    }

    pub fn max_abs(&self) -> f64 {
        self.values.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
    }

    /// Boxcar smoothing with window `2n + 1`.
    pub fn smooth(&mut self, n: usize) {
        if n == 0 || self.values.len() < 3 {
            return;
        }
        let src = self.values.clone();
        for i in 0..src.len() {
            let lo = i.saturating_sub(n);
            let hi = (i + n).min(src.len() - 1);
            self.values[i] = src[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64;
        }
    }
}

/// Percent area error between reference and calculated data over their common
/// x range, interpolating the calculated data onto the reference axis.
pub fn r_factor(reference: &Data1D, calculated: &Data1D) -> f64 {
    if reference.is_empty() || calculated.is_empty() {
        return 0.0;
    }
    let lo = reference.x(0).max(calculated.x(0));
    let hi = reference.x(reference.n_values() - 1).min(calculated.x(calculated.n_values() - 1));

    let mut sum_delta = 0.0;
    let mut sum_ref = 0.0;
    for i in 0..reference.n_values() {
        let x = reference.x(i);
        if x < lo || x > hi {
            continue;
        }
        sum_delta += (reference.value(i) - calculated.interpolated(x)).abs();
        sum_ref += reference.value(i).abs();
    }
    if sum_ref > 0.0 {
        100.0 * sum_delta / sum_ref
    } else {
        0.0
    }
}

/// Two-dimensional tabulated data (restart payloads and export only).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Data2D {
    pub tag: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Row-major values: index = iy * nX + ix.
    pub values: Vec<f64>,
    pub errors: Option<Vec<f64>>,
}

impl Data2D {
    pub fn new(tag: &str, x: Vec<f64>, y: Vec<f64>) -> Self {
        let n = x.len() * y.len();
        Self {
            tag: tag.to_string(),
            x,
            y,
            values: vec![0.0; n],
            errors: None,
        }
    }

    pub fn value(&self, ix: usize, iy: usize) -> f64 {
        self.values[iy * self.x.len() + ix]
    }

    pub fn set_value(&mut self, ix: usize, iy: usize, v: f64) {
        let n_x = self.x.len();
        self.values[iy * n_x + ix] = v;
    }
}

/// Three-dimensional tabulated data (restart payloads and export only).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Data3D {
    pub tag: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    /// Row-major values: index = (iz * nY + iy) * nX + ix.
    pub values: Vec<f64>,
    pub errors: Option<Vec<f64>>,
}

impl Data3D {
    pub fn new(tag: &str, x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Self {
        let n = x.len() * y.len() * z.len();
        Self {
            tag: tag.to_string(),
            x,
            y,
            z,
            values: vec![0.0; n],
            errors: None,
        }
    }

    pub fn value(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        self.values[(iz * self.y.len() + iy) * self.x.len() + ix]
    }

    pub fn set_value(&mut self, ix: usize, iy: usize, iz: usize, v: f64) {
        let (n_x, n_y) = (self.x.len(), self.y.len());
        self.values[(iz * n_y + iy) * n_x + ix] = v;
    }
}
