/*!
System-variance controls: the optional 'system' section of a configuration
pins down sources of measurement noise for the duration of the plan.

All controls are modeled as one scoped acquisition: `SystemGuard::apply`
records the previous state of everything it touches and the guard's `Drop`
restores it, so the machine is put back on every exit path. A control that
cannot be applied aborts the run before any cell executes; a control that
cannot be reverted is reported but does not fail the run.

Everything here is Linux-flavored POSIX: affinity and ASLR go through
libc, SMT/boost/governor through sysfs. All of it needs a suitably
privileged process.
*/

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::format::config::System;

const SMT_CONTROL: &str = "/sys/devices/system/cpu/smt/control";
const CPUFREQ_BOOST: &str = "/sys/devices/system/cpu/cpufreq/boost";
const INTEL_NO_TURBO: &str = "/sys/devices/system/cpu/intel_pstate/no_turbo";
const CPU_DIR: &str = "/sys/devices/system/cpu";

/// The applied 'system' section. Dropping the guard reverts every control,
/// in reverse order of application.
pub struct SystemGuard {
    restores: Vec<Restore>,
}

enum Restore {
    SysFile { path: PathBuf, value: String },
    Affinity { mask: libc::cpu_set_t },
    Personality { persona: libc::c_ulong },
}

impl SystemGuard {
    /// Apply every control requested by the configuration. On error, the
    /// controls applied so far are reverted (by dropping the partial
    /// guard) and the error is returned.
    pub fn apply(system: &System) -> anyhow::Result<SystemGuard> {
        let mut guard = SystemGuard { restores: vec![] };
        if system.is_noop() {
            return Ok(guard);
        }
        if !system.isolate_cpus.is_empty() {
            guard.isolate_cpus(&system.isolate_cpus).context(
                "system.isolate-cpus: failed to restrict CPU affinity",
            )?;
        }
        if system.disable_aslr {
            guard
                .disable_aslr()
                .context("system.disable-aslr: failed to disable ASLR")?;
        }
        if system.disable_smt {
            guard
                .swap_sysfs(Path::new(SMT_CONTROL), "off")
                .context("system.disable-smt: failed to disable SMT")?;
        }
        if system.disable_core_boost {
            guard.disable_core_boost().context(
                "system.disable-core-boost: failed to disable core boost",
            )?;
        }
        if system.governor_performance {
            guard.governor_performance().context(
                "system.governor-performance: failed to set the \
                 performance governor",
            )?;
        }
        Ok(guard)
    }

    /// Restrict the engine's CPU affinity to the given CPUs. Children
    /// inherit the mask, so one call before the plan covers every
    /// benchmarked process.
    fn isolate_cpus(&mut self, cpus: &[u32]) -> anyhow::Result<()> {
        let size = std::mem::size_of::<libc::cpu_set_t>();
        // SAFETY: cpu_set_t is plain old data; sched_getaffinity fills it.
        let mut old: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::sched_getaffinity(0, size, &mut old) };
        if ret != 0 {
            return Err(anyhow::Error::from(std::io::Error::last_os_error())
                .context("sched_getaffinity"));
        }
        let mut mask: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::CPU_ZERO(&mut mask);
            for &cpu in cpus {
                libc::CPU_SET(cpu as usize, &mut mask);
            }
        }
        let ret = unsafe { libc::sched_setaffinity(0, size, &mask) };
        if ret != 0 {
            return Err(anyhow::Error::from(std::io::Error::last_os_error())
                .context("sched_setaffinity"));
        }
        self.restores.push(Restore::Affinity { mask: old });
        Ok(())
    }

    /// Turn off address space layout randomization for this process and
    /// its children via personality(2).
    fn disable_aslr(&mut self) -> anyhow::Result<()> {
        // Passing 0xffffffff reads the current persona without changing it.
        let persona = unsafe { libc::personality(0xffffffff) };
        if persona == -1 {
            return Err(anyhow::Error::from(std::io::Error::last_os_error())
                .context("failed to read current persona"));
        }
        let wanted =
            (persona as libc::c_ulong) | (libc::ADDR_NO_RANDOMIZE as libc::c_ulong);
        let ret = unsafe { libc::personality(wanted) };
        if ret == -1 {
            return Err(anyhow::Error::from(std::io::Error::last_os_error())
                .context("failed to set persona"));
        }
        self.restores
            .push(Restore::Personality { persona: persona as libc::c_ulong });
        Ok(())
    }

    fn disable_core_boost(&mut self) -> anyhow::Result<()> {
        // AMD and the acpi-cpufreq driver expose a global boost toggle;
        // intel_pstate has its own inverted knob.
        if Path::new(CPUFREQ_BOOST).exists() {
            self.swap_sysfs(Path::new(CPUFREQ_BOOST), "0")
        } else if Path::new(INTEL_NO_TURBO).exists() {
            self.swap_sysfs(Path::new(INTEL_NO_TURBO), "1")
        } else {
            anyhow::bail!(
                "neither {} nor {} exists on this system",
                CPUFREQ_BOOST,
                INTEL_NO_TURBO,
            )
        }
    }

    fn governor_performance(&mut self) -> anyhow::Result<()> {
        let mut found = false;
        let entries = std::fs::read_dir(CPU_DIR)
            .with_context(|| format!("failed to list {}", CPU_DIR))?;
        let mut names = vec![];
        for entry in entries {
            names.push(entry?.file_name());
        }
        // Deterministic application (and therefore revert) order.
        names.sort();
        for name in names {
            let Some(name) = name.to_str() else { continue };
            if !regex!(r"^cpu[0-9]+$").is_match(name) {
                continue;
            }
            let path = Path::new(CPU_DIR)
                .join(name)
                .join("cpufreq/scaling_governor");
            if !path.exists() {
                continue;
            }
            self.swap_sysfs(&path, "performance")?;
            found = true;
        }
        anyhow::ensure!(found, "no cpufreq scaling_governor files found");
        Ok(())
    }

    /// Write a new value into a sysfs file, remembering the old one for
    /// revert.
    fn swap_sysfs(&mut self, path: &Path, value: &str) -> anyhow::Result<()> {
        let old = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        std::fs::write(path, value)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.restores.push(Restore::SysFile {
            path: path.to_path_buf(),
            value: old.trim().to_string(),
        });
        Ok(())
    }
}

impl Drop for SystemGuard {
    fn drop(&mut self) {
        while let Some(restore) = self.restores.pop() {
            let result = match restore {
                Restore::SysFile { ref path, ref value } => {
                    std::fs::write(path, value).with_context(|| {
                        format!("failed to restore {}", path.display())
                    })
                }
                Restore::Affinity { ref mask } => {
                    let size = std::mem::size_of::<libc::cpu_set_t>();
                    let ret =
                        unsafe { libc::sched_setaffinity(0, size, mask) };
                    if ret != 0 {
                        Err(anyhow::Error::from(
                            std::io::Error::last_os_error(),
                        )
                        .context("failed to restore CPU affinity"))
                    } else {
                        Ok(())
                    }
                }
                Restore::Personality { persona } => {
                    let ret = unsafe { libc::personality(persona) };
                    if ret == -1 {
                        Err(anyhow::Error::from(
                            std::io::Error::last_os_error(),
                        )
                        .context("failed to restore persona"))
                    } else {
                        Ok(())
                    }
                }
            };
            if let Err(err) = result {
                log::warn!("system control revert: {:#}", err);
            }
        }
    }
}
