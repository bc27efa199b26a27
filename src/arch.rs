//! Host architecture normalization.
//!
//! Install trees key their layouts by a single 32-bit x86 token while hosts
//! report i386..i686. Each tree convention gets its own mapping.

/// True for `i386`, `i486`, `i586` and `i686`.
pub fn is_x86_32(arch: &str) -> bool {
    let bytes = arch.as_bytes();
    bytes.len() == 4
        && bytes[0] == b'i'
        && (b'3'..=b'6').contains(&bytes[1])
        && &arch[2..] == "86"
}

/// Token used by Red Hat, Suse and generic layouts (`boot/i386/...`).
pub fn tree_arch(arch: &str) -> &str {
    if is_x86_32(arch) {
        "i386"
    } else {
        arch
    }
}

/// Token used by Debian-family installer trees (`netboot/.../amd64/`).
pub fn debian_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        a if is_x86_32(a) => "i386",
        other => other,
    }
}
