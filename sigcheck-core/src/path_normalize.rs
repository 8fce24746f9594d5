// SPDX-License-Identifier: MIT OR Apache-2.0
//! Path normalization (§6): a loaded module's path (e.g.
//! `\SystemRoot\System32\notepad.exe` or `C:\Windows\System32\notepad.exe`)
//! is rewritten onto the `\Device\HarddiskVolumeN\...` notation that
//! `FileObject`s enumerated from memory use, so the two can be matched.
//!
//! Only the first of the three literal substitutions that actually occurs
//! in the path is applied, mirroring the source plugin's behavior of
//! splitting on each candidate key and using whichever split first
//! produces exactly one match.

use regex::{Regex, RegexBuilder};

const REPLACEMENTS: &[(&str, &str)] = &[
    (r"\SystemRoot", r"\\Device\\HarddiskVolume[0-9]\\Windows"),
    (r"\\?\C:", r"\\Device\\HarddiskVolume[0-9]"),
    ("C:", r"\\Device\\HarddiskVolume[0-9]"),
];

/// Builds a case-insensitive regex that matches `module_path` against the
/// device-path notation a `FileObject` name uses. A path that already uses
/// device notation (none of the three literals present) matches itself
/// literally.
pub fn to_device_pattern(module_path: &str) -> Option<Regex> {
    for (literal, device_prefix) in REPLACEMENTS {
        if let Some(pos) = module_path.find(literal) {
            let remainder = &module_path[pos + literal.len()..];
            let pattern = format!("^{device_prefix}{}$", regex::escape(remainder));
            return RegexBuilder::new(&pattern).case_insensitive(true).build().ok();
        }
    }
    let pattern = format!("^{}$", regex::escape(module_path));
    RegexBuilder::new(&pattern).case_insensitive(true).build().ok()
}

/// `true` iff `file_object_name` is the device-path form of `module_path`.
pub fn matches_device_path(module_path: &str, file_object_name: &str) -> bool {
    to_device_pattern(module_path)
        .map(|re| re.is_match(file_object_name))
        .unwrap_or(false)
}

/// The literal-prefix form of the partial-residency "likely catalog-signed"
/// heuristic (§4.8 `VALIDATE_PARTIAL`, Design Notes Open Question 1): the
/// source plugin's `re.match(r'\Device\HarddiskVolume[0-9]\Windows', ...)`
/// is interpreted here as the intended literal-backslash prefix match, not
/// its accidental escape-sequence parse.
pub fn looks_like_windows_system_path(file_object_name: &str) -> bool {
    static PREFIX: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
        RegexBuilder::new(r"^\\Device\\HarddiskVolume[0-9]\\Windows")
            .case_insensitive(true)
            .build()
            .expect("static regex is valid")
    });
    PREFIX.is_match(file_object_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_systemroot_prefix() {
        let pattern = to_device_pattern(r"\SystemRoot\System32\notepad.exe").unwrap();
        assert!(pattern.is_match(r"\Device\HarddiskVolume2\Windows\System32\notepad.exe"));
        assert!(!pattern.is_match(r"\Device\HarddiskVolume2\Windows\System32\calc.exe"));
    }

    #[test]
    fn rewrites_drive_letter_prefix() {
        let pattern = to_device_pattern(r"C:\Windows\System32\drivers\mydrv.sys").unwrap();
        assert!(pattern.is_match(r"\Device\HarddiskVolume1\Windows\System32\drivers\mydrv.sys"));
    }

    #[test]
    fn rewrites_dos_device_drive_prefix() {
        let pattern = to_device_pattern(r"\\?\C:\Windows\explorer.exe").unwrap();
        assert!(pattern.is_match(r"\Device\HarddiskVolume3\Windows\explorer.exe"));
    }

    #[test]
    fn match_is_case_insensitive() {
        assert!(matches_device_path(
            r"\SystemRoot\system32\NOTEPAD.EXE",
            r"\device\harddiskvolume2\windows\system32\notepad.exe"
        ));
    }

    #[test]
    fn device_path_with_no_rewritable_prefix_matches_itself_literally() {
        let name = r"\Device\HarddiskVolume4\Temp\tool.exe";
        assert!(matches_device_path(name, name));
        assert!(!matches_device_path(name, r"\Device\HarddiskVolume4\Temp\other.exe"));
    }

    #[test]
    fn windows_system_path_heuristic_matches_literal_prefix_only() {
        assert!(looks_like_windows_system_path(
            r"\Device\HarddiskVolume2\Windows\System32\ntdll.dll"
        ));
        assert!(!looks_like_windows_system_path(
            r"\Device\HarddiskVolume2\Users\bob\evil.exe"
        ));
    }
}
