//! Process creation and setup
//!
//! Handles creating new processes from scratch and replacing process images
//! via the exec system call. Includes argument/environment stack setup for
//! newly executed programs.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::{format, string::String, vec::Vec};

use super::{
    pcb::{Process, ProcessBuilder, ProcessState},
    table, ProcessId, ProcessPriority,
};
use crate::error::KernelError;

/// Default user stack size for a newly created or exec'd process.
pub const DEFAULT_USER_STACK_SIZE: usize = 64 * 1024;

/// Process creation options
#[cfg(feature = "alloc")]
pub struct ProcessCreateOptions {
    pub name: String,
    pub parent: Option<ProcessId>,
    pub priority: ProcessPriority,
    pub entry_point: usize,
    pub argv: Vec<String>,
    pub envp: Vec<String>,
    pub user_stack_size: usize,
}

#[cfg(feature = "alloc")]
impl Default for ProcessCreateOptions {
    fn default() -> Self {
        Self {
            name: String::from("unnamed"),
            parent: None,
            priority: ProcessPriority::Normal,
            entry_point: 0,
            argv: Vec::new(),
            envp: Vec::new(),
            user_stack_size: DEFAULT_USER_STACK_SIZE,
        }
    }
}

/// Create a new process
#[cfg(feature = "alloc")]
pub fn create_process(name: String, entry_point: usize) -> Result<ProcessId, KernelError> {
    let options = ProcessCreateOptions {
        name,
        entry_point,
        ..Default::default()
    };

    create_process_with_options(options)
}

/// Map a fresh user stack of `size` bytes at `base` into `process`'s address
/// space, returning the stack top.
#[cfg(feature = "alloc")]
fn map_user_stack(process: &Process, base: usize, size: usize) -> Result<usize, KernelError> {
    let stack_flags = crate::mm::PageFlags::PRESENT
        | crate::mm::PageFlags::USER
        | crate::mm::PageFlags::WRITABLE
        | crate::mm::PageFlags::NO_EXECUTE;

    let num_pages = size / 4096;
    process
        .with_address_space_mut(|vas| {
            for i in 0..num_pages {
                vas.map_page(base + i * 4096, stack_flags)?;
            }
            vas.set_stack_top(base + size);
            Ok(())
        })
        .ok_or(KernelError::InvalidState {
            expected: "exclusive address space",
            actual: "shared",
        })??;

    Ok(base + size)
}

/// Create a new process with options, set to [`ProcessState::Ready`] and
/// registered in the global process table.
#[cfg(feature = "alloc")]
pub fn create_process_with_options(
    options: ProcessCreateOptions,
) -> Result<ProcessId, KernelError> {
    let process = ProcessBuilder::new(options.name.clone())
        .parent(options.parent.unwrap_or(ProcessId(0)))
        .priority(options.priority)
        .build()?;

    let pid = process.pid;

    const USER_STACK_BASE: usize = 0x7000_0000_0000;
    let stack_top = map_user_stack(&process, USER_STACK_BASE, options.user_stack_size)?;

    let argv_refs: Vec<&str> = options.argv.iter().map(|s| s.as_str()).collect();
    let envp_refs: Vec<&str> = options.envp.iter().map(|s| s.as_str()).collect();
    let vas = process.address_space();
    let sp = setup_exec_stack(&vas, stack_top, &argv_refs, &envp_refs, None)?;

    let main_thread = crate::sched::Thread::new_user(
        format!("{}-main", options.name),
        options.entry_point as u64,
        sp as u64,
    );
    main_thread.bind_process(process.clone());
    process.add_thread(main_thread.clone());

    table::add_process(process.clone());
    process.set_state(ProcessState::Ready);
    crate::sched::schedule_thread(main_thread);

    Ok(pid)
}

/// Load and run an ELF binary as a brand-new process with no parent,
/// used once at boot to start the first user program (spec §6). Unlike
/// [`create_process_with_options`], which starts a thread at a caller-
/// supplied entry point with no image of its own, this loads `path`'s ELF
/// into a fresh address space first -- the same sequence [`try_exec`]
/// uses to replace a running process's image, minus the "current process"
/// it would otherwise reuse.
#[cfg(feature = "alloc")]
pub fn spawn_init(path: &str) -> Result<ProcessId, KernelError> {
    use crate::{elf::ElfLoader, fs, mm::VirtualAddressSpace};

    let file_data = fs::read_file(path).map_err(|_| KernelError::FsError(crate::error::FsError::NotFound))?;

    let process = ProcessBuilder::new(String::from("init")).build()?;
    let pid = process.pid;

    let mut vas = VirtualAddressSpace::new();
    vas.init()?;
    let entry_point = ElfLoader::load(&file_data, &mut vas).map_err(|_| KernelError::InvalidArgument {
        name: "elf",
        value: "failed to load init ELF",
    })?;

    const USER_STACK_BASE: usize = 0x7000_0000_0000;
    let stack_flags = crate::mm::PageFlags::PRESENT
        | crate::mm::PageFlags::USER
        | crate::mm::PageFlags::WRITABLE
        | crate::mm::PageFlags::NO_EXECUTE;
    let num_pages = DEFAULT_USER_STACK_SIZE / 4096;
    for i in 0..num_pages {
        vas.map_page(USER_STACK_BASE + i * 4096, stack_flags)?;
    }
    let stack_top = USER_STACK_BASE + DEFAULT_USER_STACK_SIZE;
    vas.set_stack_top(stack_top);

    let argv = [path];
    let envp: [&str; 0] = [];
    let sp = setup_exec_stack(&vas, stack_top, &argv, &envp, None)?;

    process.replace_address_space(vas);

    let main_thread = crate::sched::Thread::new_user(String::from("init-main"), entry_point, sp as u64);
    main_thread.bind_process(process.clone());
    process.add_thread(main_thread.clone());

    table::add_process(process.clone());
    process.set_state(ProcessState::Ready);
    crate::sched::schedule_thread(main_thread);

    Ok(pid)
}

/// Parse a shebang (#!) line from the beginning of a file
///
/// If the data starts with `#!`, extracts the interpreter path and optional
/// argument from the first line (up to 256 bytes or first newline).
///
/// # Examples
/// - `#!/bin/sh\n`        -> Some(("/bin/sh", None))
/// - `#!/bin/sh -e\n`     -> Some(("/bin/sh", Some("-e")))
/// - `#!/usr/bin/env python3\n` -> Some(("/usr/bin/env", Some("python3")))
/// - `\x7fELF...`         -> None (not a shebang)
#[cfg(feature = "alloc")]
pub fn parse_shebang(data: &[u8]) -> Option<(String, Option<String>)> {
    if data.len() < 2 || data[0] != b'#' || data[1] != b'!' {
        return None;
    }

    let max_len = data.len().min(256);
    let line_end = data[2..max_len]
        .iter()
        .position(|&b| b == b'\n')
        .map(|pos| pos + 2)
        .unwrap_or(max_len);

    let line = core::str::from_utf8(&data[2..line_end]).ok()?;
    let line = line.trim();

    if line.is_empty() {
        return None;
    }

    if let Some(space_pos) = line.find([' ', '\t']) {
        let interpreter = line[..space_pos].trim();
        let arg = line[space_pos + 1..].trim();
        if interpreter.is_empty() {
            return None;
        }
        let opt_arg = if arg.is_empty() {
            None
        } else {
            Some(String::from(arg))
        };
        Some((String::from(interpreter), opt_arg))
    } else {
        Some((String::from(line), None))
    }
}

/// Search for an executable by name in PATH directories
///
/// If `name` contains a `/`, it is treated as an explicit path and returned
/// as-is (if it exists in the VFS). Otherwise, this checks the current
/// process's `env_vars` for a `PATH` entry (colon-separated directories),
/// falling back to `/bin`, `/usr/bin`, `/usr/local/bin`.
#[cfg(feature = "alloc")]
pub fn search_path(name: &str) -> Option<String> {
    use crate::fs;

    if name.contains('/') {
        return fs::file_exists(name).then(|| String::from(name));
    }

    let path_env: Option<String> = super::current_process().and_then(|proc| {
        let env = proc.env_vars.lock();
        env.get("PATH").cloned()
    });

    if let Some(ref path_val) = path_env {
        for dir in path_val.split(':') {
            if dir.is_empty() {
                continue;
            }
            let full_path = format!("{}/{}", dir, name);
            if fs::file_exists(&full_path) {
                return Some(full_path);
            }
        }
    } else {
        const DEFAULT_SEARCH_DIRS: &[&str] = &["/bin", "/usr/bin", "/usr/local/bin"];
        for dir in DEFAULT_SEARCH_DIRS {
            let full_path = format!("{}/{}", dir, name);
            if fs::file_exists(&full_path) {
                return Some(full_path);
            }
        }
    }

    None
}

/// Replace the current process image with a new program.
///
/// Builds a fresh address space, loads the ELF into it, and swaps it into
/// the process. Rather than mutate the calling thread's saved context in
/// place, this spawns a brand-new thread at the program's entry point and
/// retires the caller through [`crate::sched::exit_current`] -- the calling
/// thread never returns from a successful `exec`.
///
/// Supports shebang (`#!`) scripts and PATH search for bare names.
#[cfg(feature = "alloc")]
pub fn exec_process(path: &str, argv: &[&str], envp: &[&str]) -> ! {
    match try_exec(path, argv, envp) {
        Ok(()) => crate::sched::exit_current(),
        Err(e) => {
            crate::println!("[PROCESS] exec {} failed: {}", path, e);
            super::exit::exit_process(-1)
        }
    }
}

#[cfg(feature = "alloc")]
fn try_exec(path: &str, argv: &[&str], envp: &[&str]) -> Result<(), KernelError> {
    use crate::{elf::ElfLoader, fs, mm::VirtualAddressSpace};

    let process = super::current_process().ok_or(KernelError::ProcessNotFound { pid: 0 })?;

    let resolved_path = if path.starts_with('/') {
        String::from(path)
    } else {
        search_path(path).ok_or(KernelError::FsError(crate::error::FsError::NotFound))?
    };

    let file_data =
        fs::read_file(&resolved_path).map_err(|_| KernelError::FsError(crate::error::FsError::NotFound))?;

    if let Some((interpreter, opt_arg)) = parse_shebang(&file_data) {
        let mut new_argv: Vec<&str> = Vec::new();
        new_argv.push(&interpreter);

        let opt_arg_string;
        if let Some(ref arg) = opt_arg {
            opt_arg_string = arg.clone();
            new_argv.push(&opt_arg_string);
        }

        new_argv.push(&resolved_path);
        if argv.len() > 1 {
            new_argv.extend_from_slice(&argv[1..]);
        }

        return try_exec(&interpreter, &new_argv, envp);
    }

    let mut vas = VirtualAddressSpace::new();
    vas.init()?;
    let entry_point = ElfLoader::load(&file_data, &mut vas).map_err(|_| KernelError::InvalidArgument {
        name: "elf",
        value: "failed to load ELF",
    })?;

    let (final_entry, aux_vector) = {
        let loader = ElfLoader::new();
        let elf_binary = loader.parse(&file_data).map_err(|_| KernelError::InvalidArgument {
            name: "elf",
            value: "failed to parse ELF for dynamic linking check",
        })?;

        if elf_binary.dynamic && elf_binary.interpreter.is_some() {
            let dyn_info = crate::elf::dynamic::prepare_dynamic_linking(
                &file_data,
                &elf_binary,
                elf_binary.load_base,
            )?
            .ok_or(KernelError::InvalidArgument {
                name: "dynamic",
                value: "binary has interpreter but prepare_dynamic_linking returned None",
            })?;

            let interp_data = fs::read_file(&dyn_info.interp_path)
                .map_err(|_| KernelError::FsError(crate::error::FsError::NotFound))?;
            ElfLoader::load(&interp_data, &mut vas).map_err(|_| KernelError::InvalidArgument {
                name: "elf",
                value: "failed to load interpreter",
            })?;

            (dyn_info.interp_entry, Some(dyn_info.aux_vector))
        } else {
            (entry_point, None)
        }
    };

    const USER_STACK_BASE: usize = 0x7000_0000_0000;
    let stack_flags = crate::mm::PageFlags::PRESENT
        | crate::mm::PageFlags::USER
        | crate::mm::PageFlags::WRITABLE
        | crate::mm::PageFlags::NO_EXECUTE;
    let num_pages = DEFAULT_USER_STACK_SIZE / 4096;
    for i in 0..num_pages {
        vas.map_page(USER_STACK_BASE + i * 4096, stack_flags)?;
    }
    let stack_top = USER_STACK_BASE + DEFAULT_USER_STACK_SIZE;
    vas.set_stack_top(stack_top);

    let sp = setup_exec_stack(&vas, stack_top, argv, envp, aux_vector.as_deref())?;

    {
        let mut env_map = process.env_vars.lock();
        env_map.clear();
        for &env_str in envp {
            if let Some(eq_pos) = env_str.find('=') {
                let key = String::from(&env_str[..eq_pos]);
                let value = String::from(&env_str[eq_pos + 1..]);
                env_map.insert(key, value);
            }
        }
    }

    process.file_table.lock().close_on_exec();

    process.destroy_address_space();
    process.replace_address_space(vas);

    let new_thread =
        crate::sched::Thread::new_user(format!("{}-exec", process.name), final_entry, sp as u64);
    new_thread.bind_process(process.clone());
    process.add_thread(new_thread.clone());
    crate::sched::schedule_thread(new_thread);

    Ok(())
}

/// Write a value to a user-space stack address via the physical memory window.
///
/// # Safety
///
/// `vaddr` must be a valid mapped address in `vas` with write permissions,
/// and the caller must ensure no concurrent access to this memory.
#[cfg(feature = "alloc")]
unsafe fn write_to_user_stack(vas: &crate::mm::VirtualAddressSpace, vaddr: usize, value: usize) {
    let bytes = value.to_ne_bytes();
    vas.copy_to(vaddr, &bytes);
}

/// Write a byte slice to a user-space stack address via the physical memory
/// window. Same requirements as [`write_to_user_stack`]; the range must lie
/// within a single mapped page.
#[cfg(feature = "alloc")]
unsafe fn write_bytes_to_user_stack(vas: &crate::mm::VirtualAddressSpace, vaddr: usize, data: &[u8]) {
    vas.copy_to(vaddr, data);
}

/// Write the argc/argv/envp/auxv layout to a freshly mapped user stack.
///
/// Layout, growing downward from `stack_top`:
///
/// ```text
/// [high addresses]
///   envp strings (null-terminated)
///   argv strings (null-terminated)
///   padding (16-byte alignment)
///   AT_NULL                  <- auxv terminator (if present)
///   auxv[N-1] (type, value)
///   ...
///   NULL                     <- envp[N]
///   envp[N-1] pointer
///   ...
///   NULL                     <- argv[argc]
///   argv[argc-1] pointer
///   ...
///   argc (usize)             <- SP (returned)
/// [low addresses]
/// ```
#[cfg(feature = "alloc")]
fn setup_exec_stack(
    vas: &crate::mm::VirtualAddressSpace,
    stack_top: usize,
    argv: &[&str],
    envp: &[&str],
    aux_vector: Option<&[crate::elf::dynamic::AuxVecEntry]>,
) -> Result<usize, KernelError> {
    let stack_base = vas.user_stack_base();

    let mut string_sp = stack_top;

    let mut envp_addrs: Vec<usize> = Vec::with_capacity(envp.len());
    for &env in envp.iter().rev() {
        let bytes = env.as_bytes();
        string_sp -= bytes.len() + 1;
        unsafe {
            write_bytes_to_user_stack(vas, string_sp, bytes);
            write_bytes_to_user_stack(vas, string_sp + bytes.len(), &[0]);
        }
        envp_addrs.push(string_sp);
    }
    envp_addrs.reverse();

    let mut argv_addrs: Vec<usize> = Vec::with_capacity(argv.len());
    for &arg in argv.iter().rev() {
        let bytes = arg.as_bytes();
        string_sp -= bytes.len() + 1;
        unsafe {
            write_bytes_to_user_stack(vas, string_sp, bytes);
            write_bytes_to_user_stack(vas, string_sp + bytes.len(), &[0]);
        }
        argv_addrs.push(string_sp);
    }
    argv_addrs.reverse();

    let mut sp = string_sp & !0xF;

    let auxv_slots = aux_vector.map(|v| v.len() * 2).unwrap_or(0);
    let ptrs_needed = 1 + argv.len() + 1 + envp.len() + 1 + auxv_slots;
    sp -= ptrs_needed * core::mem::size_of::<usize>();
    sp &= !0xF;

    if sp < stack_base {
        return Err(KernelError::OutOfMemory {
            requested: stack_top - sp,
            available: stack_top - stack_base,
        });
    }

    let mut write_pos = sp;

    unsafe { write_to_user_stack(vas, write_pos, argv.len()) };
    write_pos += core::mem::size_of::<usize>();

    for &addr in &argv_addrs {
        unsafe { write_to_user_stack(vas, write_pos, addr) };
        write_pos += core::mem::size_of::<usize>();
    }
    unsafe { write_to_user_stack(vas, write_pos, 0) };
    write_pos += core::mem::size_of::<usize>();

    for &addr in &envp_addrs {
        unsafe { write_to_user_stack(vas, write_pos, addr) };
        write_pos += core::mem::size_of::<usize>();
    }
    unsafe { write_to_user_stack(vas, write_pos, 0) };
    write_pos += core::mem::size_of::<usize>();

    if let Some(auxv) = aux_vector {
        for entry in auxv {
            unsafe { write_to_user_stack(vas, write_pos, entry.type_id as usize) };
            write_pos += core::mem::size_of::<usize>();
            unsafe { write_to_user_stack(vas, write_pos, entry.value as usize) };
            write_pos += core::mem::size_of::<usize>();
        }
    }

    Ok(sp)
}
