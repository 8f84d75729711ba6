use packfs::{Fs, OpenMode, Result, StreamIo};

/// Collect the virtual paths of all files under `dir`, depth first, with
/// children in listing order.
pub fn traverse_files(fs: &Fs, dir: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut queue = vec![dir.trim_end_matches('/').to_owned()];

    while let Some(dir) = queue.pop() {
        let mut subdirs = Vec::new();
        for ent in fs.read_dir(&dir)? {
            let ent = ent?;
            let path = if dir.is_empty() {
                ent.name().to_owned()
            } else {
                format!("{dir}/{}", ent.name())
            };
            if ent.info().is_dir() {
                subdirs.push(path);
            } else {
                files.push(path);
            }
        }
        queue.extend(subdirs.into_iter().rev());
    }
    Ok(files)
}

#[derive(Debug, Default)]
pub struct CheckResult {
    pub files: u64,
    pub bytes: u64,
    pub oks: u64,
}

/// Read every file under `dir` to the end and compare the byte count with its
/// reported length.
pub fn check_files(fs: &Fs, dir: &str) -> Result<CheckResult> {
    let mut ret = CheckResult::default();
    for path in traverse_files(fs, dir)? {
        let file = fs.open(&path, OpenMode::READ)?;
        let expect = file.info()?.len();
        let got = std::io::copy(&mut StreamIo(file), &mut std::io::sink())?;
        ret.files += 1;
        ret.bytes += got;
        if got == expect {
            ret.oks += 1;
        } else {
            log::warn!("{path}: read {got} bytes, expected {expect}");
        }
    }
    Ok(ret)
}
