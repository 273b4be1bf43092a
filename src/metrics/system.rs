// 该文件是 Liuying （流影） 项目的一部分。
// src/metrics/system.rs - 系统资源采样
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::BTreeMap;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::telemetry::Metric;

/// 指标名到读数，读不到的项不出现
pub type SystemSample = BTreeMap<String, f64>;

const MB: f64 = 1024.0 * 1024.0;

pub trait ResourceProbe {
  fn sample(&mut self) -> SystemSample;
}

impl<P: ResourceProbe + ?Sized> ResourceProbe for Box<P> {
  fn sample(&mut self) -> SystemSample {
    (**self).sample()
  }
}

/// 进程 CPU/内存，以及（启用 `nvml` 时）加速卡读数
pub struct SystemProbe {
  system: System,
  pid: Option<Pid>,
  #[cfg(feature = "nvml")]
  gpu: Option<GpuProbe>,
}

impl SystemProbe {
  /// 在运行开始时检查一次能力：取不到进程号或加速卡时，对应的键永远不会出现
  pub fn new(accelerator: Option<u32>) -> Self {
    let pid = match sysinfo::get_current_pid() {
      Ok(pid) => Some(pid),
      Err(e) => {
        warn!("无法获取当前进程号，进程指标不可用: {}", e);
        None
      }
    };

    let mut system = System::new();
    if let Some(pid) = pid {
      // 第一次刷新只建立 CPU 基线
      system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_cpu().with_memory(),
      );
    }

    #[cfg(feature = "nvml")]
    let gpu = accelerator.and_then(GpuProbe::new);
    #[cfg(not(feature = "nvml"))]
    if accelerator.is_some() {
      info!("未启用 nvml 特性，加速卡指标不可用");
    }

    Self {
      system,
      pid,
      #[cfg(feature = "nvml")]
      gpu,
    }
  }
}

impl ResourceProbe for SystemProbe {
  fn sample(&mut self) -> SystemSample {
    let mut sample = SystemSample::new();

    if let Some(pid) = self.pid {
      self.system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_cpu().with_memory(),
      );
      if let Some(process) = self.system.process(pid) {
        sample.insert("sys/cpu_percent".to_string(), process.cpu_usage() as f64);
        sample.insert(
          "sys/memory_rss_mb".to_string(),
          process.memory() as f64 / MB,
        );
        sample.insert(
          "sys/memory_vms_mb".to_string(),
          process.virtual_memory() as f64 / MB,
        );
      } else {
        debug!("进程信息暂不可用");
      }
    }

    #[cfg(feature = "nvml")]
    if let Some(gpu) = self.gpu.as_ref() {
      gpu.sample_into(&mut sample);
    }

    sample
  }
}

#[cfg(feature = "nvml")]
struct GpuProbe {
  nvml: nvml_wrapper::Nvml,
  index: u32,
}

#[cfg(feature = "nvml")]
impl GpuProbe {
  fn new(index: u32) -> Option<Self> {
    let nvml = match nvml_wrapper::Nvml::init() {
      Ok(nvml) => nvml,
      Err(e) => {
        info!("NVML 不可用，跳过加速卡指标: {}", e);
        return None;
      }
    };
    if let Err(e) = nvml.device_by_index(index) {
      info!("找不到加速卡 {}: {}", index, e);
      return None;
    }
    info!("加速卡 {} 指标已启用", index);
    Some(Self { nvml, index })
  }

  fn sample_into(&self, sample: &mut SystemSample) {
    use nvml_wrapper::enum_wrappers::device::TemperatureSensor;

    let device = match self.nvml.device_by_index(self.index) {
      Ok(device) => device,
      Err(e) => {
        debug!("加速卡读取失败: {}", e);
        return;
      }
    };

    if let Ok(memory) = device.memory_info() {
      sample.insert("sys/gpu_memory_used_mb".to_string(), memory.used as f64 / MB);
      sample.insert("sys/gpu_memory_total_mb".to_string(), memory.total as f64 / MB);
    }
    if let Ok(util) = device.utilization_rates() {
      sample.insert("sys/gpu_utilization_pct".to_string(), util.gpu as f64);
    }
    if let Ok(temp) = device.temperature(TemperatureSensor::Gpu) {
      sample.insert("sys/gpu_temperature_c".to_string(), temp as f64);
    }
    if let Ok(power_mw) = device.power_usage() {
      sample.insert("sys/gpu_power_w".to_string(), power_mw as f64 / 1000.0);
    }
  }
}

/// 单个键在所有含该键的样本上的统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyStats {
  pub max: f64,
  pub mean: f64,
  pub count: usize,
}

/// 每 `every` 个已处理帧采样一次
pub struct SystemSampler<P: ResourceProbe> {
  probe: P,
  every: u64,
  samples: Vec<SystemSample>,
}

impl<P: ResourceProbe> SystemSampler<P> {
  pub fn new(probe: P, every: u64) -> Self {
    Self {
      probe,
      every: every.max(1),
      samples: Vec::new(),
    }
  }

  /// 到达采样点时采样，返回带 `step` 的指标
  pub fn on_frame(&mut self, frame_index: u64) -> Vec<Metric> {
    if frame_index == 0 || frame_index % self.every != 0 {
      return Vec::new();
    }
    let sample = self.probe.sample();
    let metrics = sample
      .iter()
      .map(|(k, v)| Metric::at(k.clone(), *v, frame_index))
      .collect();
    self.samples.push(sample);
    metrics
  }

  pub fn samples(&self) -> &[SystemSample] {
    &self.samples
  }

  /// `<key>_max` / `<key>_mean` 汇总指标
  pub fn summary_metrics(&self) -> Vec<Metric> {
    summarize(&self.samples)
      .into_iter()
      .flat_map(|(key, stats)| {
        [
          Metric::summary(format!("{}_max", key), stats.max),
          Metric::summary(format!("{}_mean", key), stats.mean),
        ]
      })
      .collect()
  }
}

/// 对每个键只在含有它的样本上求最大值与均值
pub fn summarize(samples: &[SystemSample]) -> BTreeMap<String, KeyStats> {
  let mut acc: BTreeMap<String, (f64, f64, usize)> = BTreeMap::new();
  for sample in samples {
    for (key, value) in sample {
      let entry = acc
        .entry(key.clone())
        .or_insert((f64::NEG_INFINITY, 0.0, 0));
      entry.0 = entry.0.max(*value);
      entry.1 += value;
      entry.2 += 1;
    }
  }
  acc
    .into_iter()
    .map(|(key, (max, sum, count))| {
      (
        key,
        KeyStats {
          max,
          mean: sum / count as f64,
          count,
        },
      )
    })
    .collect()
}
