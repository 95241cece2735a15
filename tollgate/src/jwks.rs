use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{jwa, jwk, Jwk};

/// A JSON Web Key Set (JWKS)
///
/// Keys that carry a key ID are indexed on insertion, so lookups by
/// key ID do not scan the whole set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "JwksDto")]
pub struct Jwks {
    keys: Vec<Jwk>,
    #[serde(skip)]
    by_id: HashMap<jwk::KeyId, Vec<usize>>,
}

impl Jwks {
    /// Adds a key to the set
    pub fn add_key(&mut self, key: Jwk) {
        if let Some(kid) = key.key_id() {
            self.by_id
                .entry(kid.to_owned())
                .or_default()
                .push(self.keys.len());
        }
        self.keys.push(key);
    }

    /// A view of the keys in this set
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Gets the best key for the key ID and algorithm requested
    ///
    /// Of the keys sharing the requested key ID, the first one usable
    /// with the requested algorithm wins. A key is usable if it is
    /// compatible with the algorithm, does not declare a conflicting
    /// algorithm, and does not declare a non-signing usage.
    pub fn get_key_by_id<A: Into<jwa::Algorithm>>(
        &self,
        kid: &jwk::KeyIdRef,
        alg: A,
    ) -> Option<&Jwk> {
        let alg = alg.into();
        let alg_usage = alg.to_usage();

        let candidates = self.by_id.get(kid)?;

        candidates.iter().map(|&idx| &self.keys[idx]).find(|k| {
            if !k.is_compatible(alg) {
                return false;
            }

            if let Some(algorithm) = k.algorithm() {
                if algorithm != alg {
                    return false;
                }
            }

            if let Some(key_usage) = k.usage() {
                if key_usage != alg_usage {
                    return false;
                }
            }

            true
        })
    }
}

#[derive(Deserialize)]
struct JwksDto {
    #[serde(default, deserialize_with = "deserialize_keys")]
    keys: Vec<Jwk>,
}

impl From<JwksDto> for Jwks {
    fn from(dto: JwksDto) -> Self {
        let mut jwks = Self::default();
        for key in dto.keys {
            jwks.add_key(key);
        }
        jwks
    }
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<Jwk>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct MaybeJwksVisitor;

    impl<'de> serde::de::Visitor<'de> for MaybeJwksVisitor {
        type Value = Vec<Jwk>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a list of JWK objects")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            let mut index = 0_usize;

            while let Some(value) = seq.next_element()? {
                match value {
                    MaybeJwk::Jwk(jwk) => values.push(jwk),
                    MaybeJwk::Unknown(key) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            jwks.idx = index,
                            jwk.kid = ?key.kid,
                            "jwk.use" = ?key.r#use,
                            jwk.alg = ?key.alg,
                            "ignoring unknown JWK"
                        );
                        let _ = (index, key);
                    }
                }
                index += 1;
            }

            Ok(values)
        }
    }

    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum MaybeJwk {
        Jwk(Jwk),
        Unknown(JwkLike),
    }

    #[allow(dead_code)]
    #[derive(serde::Deserialize)]
    struct JwkLike {
        #[serde(default)]
        kid: Option<jwk::KeyId>,
        #[serde(rename = "use", default)]
        r#use: Option<String>,
        #[serde(default)]
        alg: Option<String>,
    }

    deserializer.deserialize_seq(MaybeJwksVisitor)
}
