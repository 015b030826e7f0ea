use {
    anyhow::{Error, format_err},
    base64::{Engine, display::Base64Display, prelude::BASE64_URL_SAFE_NO_PAD},
    rand::{TryRngCore, rngs::OsRng},
    serde::{Deserialize, Deserializer, Serialize, Serializer, de},
    std::{
        borrow::Cow,
        fmt::{self, Debug, Display},
        str::FromStr,
    },
    zeroize::{Zeroize, ZeroizeOnDrop},
};

pub const AREA_KEY_LENGTH: usize = 32;

/// Secret of a storage area. Blob keys are derived from it together with a per-blob salt.
///
/// Generated once when the area is created and never changed afterwards.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AreaKey([u8; AREA_KEY_LENGTH]);

impl AreaKey {
    #[inline]
    pub fn generate() -> anyhow::Result<Self> {
        let mut key = [0u8; AREA_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|err| format_err!("failed to generate area key: {err}"))?;
        Ok(Self(key))
    }

    #[must_use]
    #[inline]
    pub fn from_bytes(bytes: [u8; AREA_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    #[must_use]
    #[inline]
    pub fn get(&self) -> &[u8; AREA_KEY_LENGTH] {
        &self.0
    }

    #[must_use]
    #[inline]
    pub fn display_unmasked(&self) -> impl Display + '_ {
        Base64Display::new(&self.0, &BASE64_URL_SAFE_NO_PAD)
    }
}

impl TryFrom<&[u8]> for AreaKey {
    type Error = Error;

    #[inline]
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array = <[u8; AREA_KEY_LENGTH]>::try_from(bytes).map_err(|_| {
            format_err!(
                "invalid length; got {}, expected {AREA_KEY_LENGTH}",
                bytes.len()
            )
        })?;
        Ok(Self(array))
    }
}

impl<'de> Deserialize<'de> for AreaKey {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl Serialize for AreaKey {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BASE64_URL_SAFE_NO_PAD.encode(self.0).serialize(serializer)
    }
}

impl FromStr for AreaKey {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = BASE64_URL_SAFE_NO_PAD.decode(s)?;
        let key = Self::try_from(bytes.as_slice());
        bytes.zeroize();
        key
    }
}

impl Debug for AreaKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AreaKey").finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn area_key_from_str() {
        static KEY: &str = "qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqo";
        let key = AreaKey::from_str(KEY).unwrap();
        assert_eq!(key.get(), &[0xaa; AREA_KEY_LENGTH]);
        assert_eq!(key.display_unmasked().to_string(), KEY);
        AreaKey::from_str("").unwrap_err();
        AreaKey::from_str("qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqg").unwrap_err();
        AreaKey::from_str(&format!("{KEY}:")).unwrap_err();
    }

    #[test]
    fn generated_keys_differ() {
        let a = AreaKey::generate().unwrap();
        let b = AreaKey::generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(format!("{a:?}"), "AreaKey");
    }

    #[test]
    fn try_from_slice() {
        AreaKey::try_from(&[1u8; 31][..]).unwrap_err();
        AreaKey::try_from(&[1u8; 33][..]).unwrap_err();
        assert_eq!(
            AreaKey::try_from(&[1u8; 32][..]).unwrap(),
            AreaKey::from_bytes([1; 32])
        );
    }
}
