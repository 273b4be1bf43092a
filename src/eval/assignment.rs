// 该文件是 Liuying （流影） 项目的一部分。
// src/eval/assignment.rs - 最小代价指派
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

//! 匈牙利算法（Kuhn-Munkres，带势函数的 O(n²m) 实现）
//!
//! 代价矩阵可以是矩形，行数多于列数时先转置。代价必须是有限值；
//! 不允许的配对由调用方赋一个足够大的代价，求解后再剔除。

/// 返回每一行分配到的列，行数多于列数时多出的行为 `None`
pub fn min_cost_assignment(costs: &[Vec<f64>]) -> Vec<Option<usize>> {
  let rows = costs.len();
  let cols = costs.first().map_or(0, Vec::len);
  if rows == 0 || cols == 0 {
    return vec![None; rows];
  }

  if rows > cols {
    let transposed: Vec<Vec<f64>> = (0..cols)
      .map(|j| costs.iter().map(|row| row[j]).collect())
      .collect();
    let mut assignment = vec![None; rows];
    for (j, i) in min_cost_assignment(&transposed).into_iter().enumerate() {
      if let Some(i) = i {
        assignment[i] = Some(j);
      }
    }
    return assignment;
  }

  // 下标从 1 开始，第 0 列是虚拟列
  let mut u = vec![0.0; rows + 1];
  let mut v = vec![0.0; cols + 1];
  let mut owner = vec![0usize; cols + 1];
  let mut way = vec![0usize; cols + 1];

  for i in 1..=rows {
    owner[0] = i;
    let mut j0 = 0;
    let mut min_slack = vec![f64::INFINITY; cols + 1];
    let mut used = vec![false; cols + 1];

    loop {
      used[j0] = true;
      let i0 = owner[j0];
      let mut delta = f64::INFINITY;
      let mut j1 = 0;
      for j in 1..=cols {
        if used[j] {
          continue;
        }
        let slack = costs[i0 - 1][j - 1] - u[i0] - v[j];
        if slack < min_slack[j] {
          min_slack[j] = slack;
          way[j] = j0;
        }
        if min_slack[j] < delta {
          delta = min_slack[j];
          j1 = j;
        }
      }
      for j in 0..=cols {
        if used[j] {
          u[owner[j]] += delta;
          v[j] -= delta;
        } else {
          min_slack[j] -= delta;
        }
      }
      j0 = j1;
      if owner[j0] == 0 {
        break;
      }
    }

    // 沿增广路径回溯
    loop {
      let j1 = way[j0];
      owner[j0] = owner[j1];
      j0 = j1;
      if j0 == 0 {
        break;
      }
    }
  }

  let mut assignment = vec![None; rows];
  for j in 1..=cols {
    if owner[j] != 0 {
      assignment[owner[j] - 1] = Some(j - 1);
    }
  }
  assignment
}
