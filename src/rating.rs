//! Rating values.
//!
//! A rating is an integer 0–100 where 0 means unrated and each star is
//! worth 20 points; odd multiples of 10 are half stars.

use serde::Serialize;
use std::fmt;

/// Points per star.
pub const STAR: u8 = 20;

/// Highest rating value.
pub const MAX: u8 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub const UNRATED: Rating = Rating(0);

    /// Clamp any integer into 0–100.
    pub fn clamped(value: i64) -> Self {
        Rating(value.clamp(0, MAX as i64) as u8)
    }

    /// Convert a star count (0–5, fractional allowed) to a rating.
    pub fn from_stars(stars: f64) -> Self {
        if !stars.is_finite() {
            return Rating::UNRATED;
        }
        Self::clamped((stars * STAR as f64).round() as i64)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_rated(self) -> bool {
        self.0 > 0
    }

    pub fn stars(self) -> f64 {
        self.0 as f64 / STAR as f64
    }

    /// Whole-star bucket (0–5) used for exports: bucket n holds
    /// ratings in `[20n - 10, 20n + 10)`, bucket 5 includes 100.
    pub fn star_bucket(self) -> u8 {
        ((self.0 + STAR / 2) / STAR).min(5)
    }

    /// Star text such as `★★★½☆`. Without `half_stars`, half stars
    /// round down.
    pub fn to_star_text(self, half_stars: bool) -> String {
        let full = (self.0 / STAR) as usize;
        let half = half_stars && self.0 % STAR >= STAR / 2;
        let empty = 5 - full - usize::from(half);
        let mut text = String::with_capacity(15);
        text.push_str(&"★".repeat(full));
        if half {
            text.push('½');
        }
        text.push_str(&"☆".repeat(empty));
        text
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Rating> for i64 {
    fn from(r: Rating) -> i64 {
        r.0 as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping() {
        assert_eq!(Rating::clamped(-20).value(), 0);
        assert_eq!(Rating::clamped(150).value(), 100);
        assert_eq!(Rating::clamped(37).value(), 37);
        assert_eq!(Rating::clamped(i64::MIN).value(), 0);
        assert_eq!(Rating::clamped(i64::MAX).value(), 100);
    }

    #[test]
    fn test_stars_round_trip() {
        assert_eq!(Rating::from_stars(3.0).value(), 60);
        assert_eq!(Rating::from_stars(3.5).value(), 70);
        assert_eq!(Rating::from_stars(7.0).value(), 100);
        assert_eq!(Rating::from_stars(-1.0).value(), 0);
        assert_eq!(Rating::from_stars(f64::NAN), Rating::UNRATED);
        assert!((Rating::clamped(70).stars() - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_star_bucket_boundaries() {
        assert_eq!(Rating::clamped(9).star_bucket(), 0);
        assert_eq!(Rating::clamped(10).star_bucket(), 1);
        assert_eq!(Rating::clamped(29).star_bucket(), 1);
        assert_eq!(Rating::clamped(30).star_bucket(), 2);
        assert_eq!(Rating::clamped(89).star_bucket(), 4);
        assert_eq!(Rating::clamped(90).star_bucket(), 5);
        assert_eq!(Rating::clamped(100).star_bucket(), 5);
    }

    #[test]
    fn test_star_text() {
        assert_eq!(Rating::clamped(0).to_star_text(true), "☆☆☆☆☆");
        assert_eq!(Rating::clamped(60).to_star_text(true), "★★★☆☆");
        assert_eq!(Rating::clamped(70).to_star_text(true), "★★★½☆");
        assert_eq!(Rating::clamped(70).to_star_text(false), "★★★☆☆");
        assert_eq!(Rating::clamped(100).to_star_text(true), "★★★★★");
    }
}
