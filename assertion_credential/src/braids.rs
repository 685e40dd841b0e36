use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A client (application) ID
#[braid(serde)]
pub struct ClientId;

/// An identity provider tenant ID, also called a directory ID
#[braid(serde)]
pub struct TenantId;

/// A scope identifying a resource and the permissions requested on it
#[braid(serde)]
pub struct Scope;

/// A signed JWT presented to the token endpoint in place of a client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientAssertion;

limited_reveal!(ClientAssertionRef: "CLIENT ASSERTION", 5);

/// An opaque bearer access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct BearerToken;

limited_reveal!(BearerTokenRef: "ACCESS TOKEN", 15);
