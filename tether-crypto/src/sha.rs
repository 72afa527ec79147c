use sha2::Digest;

/// Hash the concatenation of `parts` with `D`, truncated or sized to `N`.
#[doc(hidden)]
pub fn digest_parts<D: Digest, const N: usize>(parts: &[&[u8]]) -> [u8; N] {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0; N];
    out.copy_from_slice(&hasher.finalize()[..N]);
    out
}

/// SHA-1 of its arguments concatenated; each must be `AsRef<[u8]>`.
#[macro_export]
macro_rules! sha1 {
    ( $( $part:expr ),+ $(,)? ) => {
        $crate::__private::digest_parts::<$crate::__private::Sha1, 20>(
            &[ $( ::core::convert::AsRef::<[u8]>::as_ref(&$part) ),+ ]
        )
    };
}

/// SHA-256 of its arguments concatenated; each must be `AsRef<[u8]>`.
#[macro_export]
macro_rules! sha256 {
    ( $( $part:expr ),+ $(,)? ) => {
        $crate::__private::digest_parts::<$crate::__private::Sha256, 32>(
            &[ $( ::core::convert::AsRef::<[u8]>::as_ref(&$part) ),+ ]
        )
    };
}
