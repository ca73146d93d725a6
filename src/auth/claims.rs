use serde::{de, Deserialize, Deserializer, Serialize};

/// Session token payload. Unknown fields make the token malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    #[serde(deserialize_with = "integral_id")]
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
    pub iat: i64, // issued at (unix seconds)
    pub exp: i64, // expires at (unix seconds)
}

/// Accepts `42` as well as `42.0`: JSON-number producers do not all keep
/// integers distinct from floats.
fn integral_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
    }

    match Number::deserialize(deserializer)? {
        Number::Int(v) => Ok(v),
        Number::Float(f)
            if f.is_finite()
                && f.fract() == 0.0
                && f >= i64::MIN as f64
                && f < i64::MAX as f64 =>
        {
            Ok(f as i64)
        }
        Number::Float(f) => Err(de::Error::custom(format!(
            "user_id must be an integer, got {f}"
        ))),
    }
}
