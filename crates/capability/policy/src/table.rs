//! 策略表与行格式解析。
//!
//! 行格式：`key:transform:batchSize:destination`，`#` 开头为注释，
//! key 为 `DEFAULT`（不区分大小写）时设置默认策略。

use domain::{DEFAULT_BATCH_SIZE, DevicePolicy, Transform};
use std::collections::HashMap;

/// 配置源缺失时写回的初始文件。
pub const BOOTSTRAP_POLICY_FILE: &str = "\
# Formato: wavyId:preProcessamento:volumeDados:servidor
# Use 'DEFAULT' como wavyId para configuracao padrao aplicada a todos os WAVYs
# Configuracoes especificas sobrescrevem a configuracao padrao

# Configuracao padrao para TODOS os WAVYs
DEFAULT:none:3:localhost

# Configuracoes especificas (opcionais)
# WAVY_001:uppercase:5:localhost
# WAVY_002:normalize:2:192.168.1.100
";

/// 整表替换的策略表，构建完成后不再修改。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    pub default_policy: DevicePolicy,
    pub overrides: HashMap<String, DevicePolicy>,
}

/// 解析统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub records: usize,
    pub skipped: usize,
    pub default_set: bool,
}

impl PolicyTable {
    /// 内置默认表。
    pub fn builtin() -> Self {
        Self::default()
    }

    /// 从文本构建新表；格式错误的行跳过。
    pub fn parse(text: &str) -> (Self, ParseStats) {
        let mut table = Self::builtin();
        let mut stats = ParseStats::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, policy)) = parse_record(line) else {
                stats.skipped += 1;
                continue;
            };
            stats.records += 1;
            if key.eq_ignore_ascii_case("DEFAULT") {
                table.default_policy = policy;
                stats.default_set = true;
            } else {
                table.overrides.insert(key, policy);
            }
        }
        (table, stats)
    }

    /// 有覆盖用覆盖，否则用默认策略。
    pub fn resolve(&self, device_id: &str) -> &DevicePolicy {
        self.overrides
            .get(device_id)
            .unwrap_or(&self.default_policy)
    }

    pub fn has_override(&self, device_id: &str) -> bool {
        self.overrides.contains_key(device_id)
    }
}

fn parse_record(line: &str) -> Option<(String, DevicePolicy)> {
    // 目的地本身可以带端口，只切前三个冒号
    let parts: Vec<&str> = line.splitn(4, ':').map(str::trim).collect();
    let [key, transform, batch_size, destination] = parts.as_slice() else {
        return None;
    };
    if key.is_empty() {
        return None;
    }
    let batch_size = batch_size.parse::<usize>().unwrap_or(DEFAULT_BATCH_SIZE);
    let policy = DevicePolicy::new(
        Transform::from_name_lenient(transform),
        batch_size,
        *destination,
    );
    Some((key.to_string(), policy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_file_yields_builtin_default() {
        let (table, stats) = PolicyTable::parse(BOOTSTRAP_POLICY_FILE);
        assert_eq!(table, PolicyTable::builtin());
        assert!(stats.default_set);
        assert_eq!(stats.records, 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = "\
DEFAULT:lowercase:4:storage-a
WAVY_001:uppercase:5
:none:2:host
WAVY_002:normalize:abc:10.0.0.2
";
        let (table, stats) = PolicyTable::parse(text);
        assert_eq!(stats.skipped, 2);
        assert_eq!(table.default_policy.transform, Transform::Lowercase);
        assert_eq!(table.default_policy.batch_size, 4);
        let policy = table.resolve("WAVY_002");
        assert_eq!(policy.transform, Transform::Normalize);
        assert_eq!(policy.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(policy.destination, "10.0.0.2");
        assert_eq!(table.resolve("WAVY_001"), &table.default_policy);
    }

    #[test]
    fn default_key_is_case_insensitive() {
        let (table, _) = PolicyTable::parse("default:uppercase:7:h");
        assert_eq!(table.default_policy.batch_size, 7);
        assert!(table.overrides.is_empty());
    }

    #[test]
    fn destination_may_carry_a_port() {
        let text = "\
DEFAULT:none:3:storage.local:7000
WAVY_001:uppercase:2:10.0.0.5:7001
";
        let (table, stats) = PolicyTable::parse(text);
        assert_eq!(stats.skipped, 0);
        assert_eq!(table.default_policy.destination, "storage.local:7000");
        let policy = table.resolve("WAVY_001");
        assert_eq!(policy.transform, Transform::Uppercase);
        assert_eq!(policy.batch_size, 2);
        assert_eq!(policy.destination, "10.0.0.5:7001");
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let (table, _) = PolicyTable::parse("WAVY_001:none:0:h");
        assert_eq!(table.resolve("WAVY_001").batch_size, 1);
    }
}
