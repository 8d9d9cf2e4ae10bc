//! Container sniffing and backend dispatch.
//!
//! Only the first byte is inspected. It is enough to tell the three formats
//! the catalog ships apart, and mislabeled archives (a `.zip` that is really
//! a RAR) still go to a backend that can read them.

use std::path::Path;

use tokio::io::AsyncReadExt;

/// Host platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// Container family recognised from the leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// `7z\xBC\xAF\x27\x1C`
    SevenZip,
    /// `PK\x03\x04`
    Zip,
    /// `Rar!\x1A\x07`
    Rar,
}

impl ContainerKind {
    pub fn from_first_byte(byte: u8) -> Option<Self> {
        match byte {
            0x37 => Some(ContainerKind::SevenZip),
            0x50 => Some(ContainerKind::Zip),
            0x52 => Some(ContainerKind::Rar),
            _ => None,
        }
    }
}

/// Extraction tool family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    SevenZip,
    Unzip,
    Tar,
}

/// Choose the backend for an archive starting with `first_byte`.
///
/// Windows always uses 7z, which reads every format we ship. Elsewhere ZIP
/// goes to the platform's native tool: Info-ZIP on Linux, bsdtar on macOS
/// where `unzip` mangles non-ASCII names.
pub fn select_backend(first_byte: u8, platform: Platform) -> Option<Backend> {
    if platform == Platform::Windows {
        return Some(Backend::SevenZip);
    }

    match ContainerKind::from_first_byte(first_byte)? {
        ContainerKind::SevenZip | ContainerKind::Rar => Some(Backend::SevenZip),
        ContainerKind::Zip => match platform {
            Platform::MacOs => Some(Backend::Tar),
            _ => Some(Backend::Unzip),
        },
    }
}

/// First byte of the file, or `None` if it is empty.
pub async fn read_first_byte(path: &Path) -> std::io::Result<Option<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut byte = [0u8; 1];
    let n = file.read(&mut byte).await?;
    Ok((n == 1).then_some(byte[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dispatch_table() {
        use Backend::*;
        use Platform::*;

        let cases = [
            (0x37, Windows, Some(SevenZip)),
            (0x37, Linux, Some(SevenZip)),
            (0x37, MacOs, Some(SevenZip)),
            (0x50, Windows, Some(SevenZip)),
            (0x50, Linux, Some(Unzip)),
            (0x50, MacOs, Some(Tar)),
            (0x52, Windows, Some(SevenZip)),
            (0x52, Linux, Some(SevenZip)),
            (0x52, MacOs, Some(SevenZip)),
            (b'<', Windows, Some(SevenZip)),
            (b'<', Linux, None),
            (b'<', MacOs, None),
        ];

        for (byte, platform, expected) in cases {
            assert_eq!(select_backend(byte, platform), expected, "{:#x} on {:?}", byte, platform);
        }
    }

    #[tokio::test]
    async fn test_read_first_byte() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        let rar = dir.path().join("a.rar");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&rar, b"Rar!\x1a\x07\x00").unwrap();

        assert_eq!(read_first_byte(&empty).await.unwrap(), None);
        assert_eq!(read_first_byte(&rar).await.unwrap(), Some(0x52));
        assert!(read_first_byte(&dir.path().join("missing")).await.is_err());
    }

    proptest! {
        #[test]
        fn test_dispatch_is_deterministic(byte in any::<u8>()) {
            for platform in [Platform::Windows, Platform::Linux, Platform::MacOs] {
                prop_assert_eq!(select_backend(byte, platform), select_backend(byte, platform));
            }
            let known = ContainerKind::from_first_byte(byte).is_some();
            prop_assert_eq!(select_backend(byte, Platform::Linux).is_some(), known);
        }
    }
}
