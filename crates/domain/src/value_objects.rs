//! Value objects shared by the catalog and order aggregates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(Uuid);

impl CustomerId {
    /// Creates a new random customer ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a customer ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CustomerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CustomerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Money amount in minor units (cents) to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a money amount from cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, saturating instead of overflowing.
    pub fn times(&self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(quantity)))
    }

    /// Applies a rate expressed in basis points (1/100th of a percent),
    /// rounding toward zero.
    pub fn basis_points(&self, bps: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(bps)) / 10_000)
    }

    /// Subtracts `other`, flooring the result at zero.
    pub fn saturating_sub_floor(&self, other: Money) -> Money {
        Money((self.0 - other.0).max(0))
    }

    /// Clamps negative amounts to zero.
    pub fn non_negative(self) -> Money {
        Money(self.0.max(0))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// Derives a URL slug: lowercase ASCII alphanumerics separated by single dashes.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "$12.34");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
    }

    #[test]
    fn test_money_times_and_sum() {
        let total: Money = [Money::from_cents(250).times(2), Money::from_cents(100)]
            .into_iter()
            .sum();
        assert_eq!(total.cents(), 600);
    }

    #[test]
    fn test_basis_points_rounds_down() {
        assert_eq!(Money::from_cents(999).basis_points(1000).cents(), 99);
        assert_eq!(Money::from_cents(1000).basis_points(0).cents(), 0);
    }

    #[test]
    fn test_saturating_sub_floor() {
        let total = Money::from_cents(1000).saturating_sub_floor(Money::from_cents(1500));
        assert!(total.is_zero());
        assert_eq!(
            Money::from_cents(1000)
                .saturating_sub_floor(Money::from_cents(300))
                .cents(),
            700
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Rust Programming Book"), "rust-programming-book");
        assert_eq!(slugify("  T-Shirt (XL)!  "), "t-shirt-xl");
        assert_eq!(slugify("***"), "");
    }
}
