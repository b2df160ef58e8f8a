//! TTL jitter policies
//!
//! Jitter spreads expirations of entries written together so they do not all
//! expire in the same instant.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;

/// Named jitter policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// Identity: the value is used as-is
    #[default]
    None,
    /// Uniform random in `[0, value]`
    Full,
    /// Uniform random in `[value / 2, value]`
    Equal,
}

impl JitterPolicy {
    /// Parses a policy name, falling back to [`JitterPolicy::None`] for unknown names
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "full" => Self::Full,
            "equal" => Self::Equal,
            _ => Self::None,
        }
    }

    fn apply_with_rng<R: Rng + ?Sized>(self, value: f64, rng: &mut R) -> f64 {
        if !value.is_finite() || value <= 0.0 {
            return value;
        }

        match self {
            Self::None => value,
            Self::Full => rng.gen_range(0.0..=value),
            Self::Equal => rng.gen_range(value / 2.0..=value),
        }
    }
}

impl FromStr for JitterPolicy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for JitterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Full => write!(f, "full"),
            Self::Equal => write!(f, "equal"),
        }
    }
}

/// Caller-supplied jitter function
pub type JitterFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// A jitter strategy: either a named policy or a custom function
#[derive(Clone)]
pub enum Jitter {
    Policy(JitterPolicy),
    Custom(JitterFn),
}

impl Jitter {
    /// Applies the jitter using the thread-local RNG
    pub fn apply(&self, value: f64) -> f64 {
        self.apply_with_rng(value, &mut rand::thread_rng())
    }

    /// Applies the jitter drawing randomness from `rng`
    pub fn apply_with_rng<R: Rng + ?Sized>(&self, value: f64, rng: &mut R) -> f64 {
        match self {
            Self::Policy(policy) => policy.apply_with_rng(value, rng),
            Self::Custom(f) => f(value),
        }
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::Policy(JitterPolicy::None)
    }
}

impl fmt::Debug for Jitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(policy) => f.debug_tuple("Policy").field(policy).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl From<JitterPolicy> for Jitter {
    fn from(policy: JitterPolicy) -> Self {
        Self::Policy(policy)
    }
}

impl From<&str> for Jitter {
    fn from(name: &str) -> Self {
        Self::Policy(JitterPolicy::from_name(name))
    }
}

/// Builds a jitter strategy from a policy, a policy name, or a function
pub fn create_jitter(policy: impl Into<Jitter>) -> Jitter {
    policy.into()
}

/// Wraps a closure as a custom jitter strategy
pub fn custom_jitter<F>(f: F) -> Jitter
where
    F: Fn(f64) -> f64 + Send + Sync + 'static,
{
    Jitter::Custom(Arc::new(f))
}
