use std::io::Write;

use packfs::{Fs, OpenMode, OsBackend, StreamIo, zip::ZipFormat};
use packfs_test::traverse::{check_files, traverse_files};

fn main() {
    env_logger::init();
    let args = std::env::args().collect::<Vec<String>>();
    let (root, cmd, path) = match &*args {
        [_, root, cmd, path] => (root, cmd, path.as_str()),
        [_, root, cmd] => (root, cmd, ""),
        _ => panic!("usage: packfs-test <root> ls|cat|tree|check [path]"),
    };

    let mut fs = Fs::new(OsBackend::new(root));
    for ext in ["zip", "pak"] {
        fs.register_archive(ext, ZipFormat::default())
            .expect("failed to register archive format");
    }

    let mut stdout = std::io::stdout().lock();
    match &**cmd {
        "ls" => {
            for ent in fs.read_dir(path).expect("failed to read directory") {
                let ent = ent.expect("failed to read directory entry");
                let info = ent.info();
                let kind = if info.is_dir() { 'd' } else { '-' };
                writeln!(stdout, "{kind} {:>12} {}", info.len(), ent.name()).unwrap();
            }
        }
        "cat" => {
            let file = fs.open(path, OpenMode::READ).expect("failed to open file");
            std::io::copy(&mut StreamIo(file), &mut stdout).expect("failed to read file");
        }
        "tree" => {
            for file in traverse_files(&fs, path).expect("failed to traverse") {
                writeln!(stdout, "{file}").unwrap();
            }
        }
        "check" => {
            let inst = std::time::Instant::now();
            let ret = check_files(&fs, path).expect("failed to check files");
            writeln!(
                stdout,
                "checked {} files, {} bytes in {:?}: {} ok",
                ret.files,
                ret.bytes,
                inst.elapsed(),
                ret.oks,
            )
            .unwrap();
            if ret.oks != ret.files {
                std::process::exit(1);
            }
        }
        _ => panic!("unknown command {cmd:?}"),
    }
}
