//! Generates one `#[test]` per fixture under `test/`, so adding a `.s`
//! file is enough to get it run by `cargo test`.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

fn main() {
    println!("cargo::rerun-if-changed=test/");

    let mut generated = String::from("// Generated from the fixtures under test/.\n\n");
    for entry in glob::glob("test/**/*.s").expect("fixture glob is valid") {
        let path = entry.expect("fixture path is readable");
        write_test(&mut generated, &path);
    }

    let out_dir = env::var_os("OUT_DIR").expect("OUT_DIR is set for build scripts");
    fs::write(Path::new(&out_dir).join("tests.rs"), generated).expect("write generated tests");
}

fn write_test(out: &mut String, path: &Path) {
    // Flatten the fixture path into a test name: `test/foo/bar.s`
    // becomes `foo_bar`.
    let name = path
        .strip_prefix("test")
        .unwrap_or(path)
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_");

    writeln!(out, "#[test]").unwrap();
    writeln!(
        out,
        "fn {name}() -> Result<(), crate::test::TestError> {{\n\
         \x20   let src = std::fs::read_to_string({path:?})\n\
         \x20       .map_err(|err| crate::test::TestError::FileError(err.to_string()))?;\n\
         \x20   crate::test::check(&src)\n\
         }}\n"
    )
    .unwrap();
}
