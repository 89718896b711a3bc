//! One function per subcommand, each a thin wrapper over the
//! [`MountableFilesystem`] operations an external mount framework would
//! otherwise call (§4.6).

use amfs_core::{Engine, MountableFilesystem, Result};

pub fn mkdir(engine: &Engine, path: &str, mode: u32) -> Result<()> {
    engine.mkdir_all(path, mode)
}

pub fn ls(engine: &Engine, path: &str) -> Result<()> {
    let mut entries = engine.read_dir(path)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    for entry in entries {
        let kind = if entry.is_dir { 'd' } else { '-' };
        println!(
            "{kind} {:>6o} {:>10} {} {}",
            entry.mode,
            entry.size,
            entry.mod_time.format("%Y-%m-%d %H:%M:%S%.9f"),
            entry.name
        );
    }
    Ok(())
}

pub fn cat(engine: &Engine, path: &str) -> Result<()> {
    use std::io::Write;

    let handle = engine.open(path)?;
    let size = engine.stat(path)?.size as usize;
    let mut buf = vec![0u8; size];
    let mut read_total = 0;
    while read_total < size {
        let n = engine.read(&handle, &mut buf[read_total..], read_total as u64)?;
        if n == 0 {
            break;
        }
        read_total += n;
    }
    engine.close_handle(handle)?;
    std::io::stdout().write_all(&buf[..read_total])?;
    Ok(())
}

pub fn write(engine: &Engine, path: &str, text: &str) -> Result<()> {
    let handle = engine.create(path)?;
    engine.write(&handle, text.as_bytes(), 0)?;
    engine.close_handle(handle)
}

pub fn stat(engine: &Engine, path: &str) -> Result<()> {
    let info = engine.stat(path)?;
    println!("name:  {}", info.name);
    println!("size:  {}", info.size);
    println!("mode:  {:o}", info.mode);
    println!("mtime: {}", info.mod_time.format("%Y-%m-%d %H:%M:%S%.9f"));
    println!("isdir: {}", info.is_dir);
    Ok(())
}

pub fn mv(engine: &Engine, old: &str, new: &str) -> Result<()> {
    engine.rename(old, new)
}

pub fn rm(engine: &Engine, path: &str) -> Result<()> {
    engine.remove(path)
}

pub fn handle(engine: &Engine, path: &str) -> Result<()> {
    let bytes = engine.to_handle(path)?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}
