#![no_main]
use blockvfs::{FileBlockStorage, VirtualFileSystem};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

// Treat the input as a whole host file and walk everything reachable
fuzz_target!(|data: &[u8]| {
    let storage = match FileBlockStorage::bootstrap(Cursor::new(data.to_vec()), 64) {
        Ok(s) => s,
        Err(_) => return,
    };
    let vfs = match VirtualFileSystem::with_storage(storage) {
        Ok(v) => v,
        Err(_) => return,
    };

    let index = match vfs.list() {
        Ok(i) => i,
        Err(_) => return,
    };
    for info in index {
        if let Ok(mut channel) = vfs.open_for_reading(&info.name) {
            let mut buf = [0u8; 256];
            while let Ok(Some(_)) = channel.read(&mut buf) {}
        }
        let _ = vfs.delete_file(&info.name);
    }
});
