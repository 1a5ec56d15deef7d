//! 查询分类器
//!
//! 用预编译正则把原始查询路由到五个类别之一，决定走快速路径还是 PEV 循环。
//! 优先级：complex → code → architecture → howto → factual；空查询或未命中均为 factual。

use std::fmt;
use std::sync::OnceLock;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::pev::types::Capability;

/// 查询类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    Factual,
    Howto,
    Architecture,
    Code,
    Complex,
}

/// 类别处理配置（静态表）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryConfig {
    pub max_iterations: u32,
    /// true 时直接调用默认能力，不规划不校验
    pub skip_pev: bool,
    /// 接受阈值；快速路径类别没有
    pub threshold: Option<f64>,
    /// 达到即提前结束循环
    pub early_accept_threshold: Option<f64>,
    /// None 表示由 Planner 自行选择能力
    pub default_capability: Option<Capability>,
    pub max_plan_steps: usize,
}

impl QueryCategory {
    pub const ALL: [QueryCategory; 5] = [
        QueryCategory::Factual,
        QueryCategory::Howto,
        QueryCategory::Architecture,
        QueryCategory::Code,
        QueryCategory::Complex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Factual => "factual",
            QueryCategory::Howto => "howto",
            QueryCategory::Architecture => "architecture",
            QueryCategory::Code => "code",
            QueryCategory::Complex => "complex",
        }
    }

    pub fn config(&self) -> CategoryConfig {
        match self {
            QueryCategory::Factual => CategoryConfig {
                max_iterations: 1,
                skip_pev: true,
                threshold: None,
                early_accept_threshold: None,
                default_capability: Some(Capability::Lookup),
                max_plan_steps: 1,
            },
            QueryCategory::Howto => CategoryConfig {
                max_iterations: 1,
                skip_pev: false,
                threshold: Some(0.70),
                early_accept_threshold: Some(0.85),
                default_capability: Some(Capability::Lookup),
                max_plan_steps: 2,
            },
            QueryCategory::Architecture => CategoryConfig {
                max_iterations: 2,
                skip_pev: false,
                threshold: Some(0.75),
                early_accept_threshold: Some(0.90),
                default_capability: Some(Capability::DesignGuidance),
                max_plan_steps: 2,
            },
            QueryCategory::Code => CategoryConfig {
                max_iterations: 1,
                skip_pev: false,
                threshold: Some(0.70),
                early_accept_threshold: Some(0.85),
                default_capability: Some(Capability::CodeGeneration),
                max_plan_steps: 1,
            },
            QueryCategory::Complex => CategoryConfig {
                max_iterations: 2,
                skip_pev: false,
                threshold: Some(0.70),
                early_accept_threshold: Some(0.80),
                default_capability: None,
                max_plan_steps: 3,
            },
        }
    }

    /// 面向调用方的类别说明
    pub fn description(&self) -> &'static str {
        match self {
            QueryCategory::Factual => {
                "Simple factual question answered by a direct documentation lookup"
            }
            QueryCategory::Howto => "Procedural how-to question answered with verified steps",
            QueryCategory::Architecture => {
                "Design or best-practice question answered with verified design guidance"
            }
            QueryCategory::Code => "Request for code, CLI commands or infrastructure templates",
            QueryCategory::Complex => {
                "Multi-part request combining research, design and generation"
            }
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const COMPLEX_PATTERNS: &[&str] = &[
    r"\band\s+(also\s+)?(write|generate|create|show|implement|design)",
    r"\bthen\s+(write|generate|create|show|implement|design|research)",
    r"\balso\s+(write|generate|create|show|explain|design)",
    r"\?\s*[A-Z]",
    r"\?\s*\w+.*\?",
    r"(design|architect).*\b(implement|code|template|bicep|terraform)",
    r"(explain|research|what).*\b(and|then)\s*(generate|write|create|show)",
];

const CODE_PATTERNS: &[&str] = &[
    r"^generate\s+",
    r"^write\s+(a|an|the|me)?\s*",
    r"^create\s+(a|an|the)?\s*(script|code|template|command)",
    r"^show\s+me\s+(the\s+)?(code|script|template|command|cli)",
    r"^give\s+me\s+(the\s+)?(code|script|template|command|cli)",
    r"(bicep|terraform|arm)\s+(template|configuration|config|code)",
    r"^(bicep|terraform|arm)\s+",
    r"(cli|powershell|bash)\s+(command|script)",
    r"^code\s+(for|to)\s+",
    r"azure\s+cli\s+(to|for|command)",
    r"^implement\s+",
    r"\bpython\s+(code|script|function)",
    r"\bc#\s+(code|class|method)",
    r"\bjavascript\s+(code|function)",
];

const ARCHITECTURE_PATTERNS: &[&str] = &[
    r"best\s+practices?\s+(for|of|in|when)",
    r"^design\s+(a|an|the)?\s*",
    r"^architect\s+",
    r"(how\s+)?should\s+i\s+design",
    r"^recommend\s+(a|an)?\s*",
    r"architecture\s+(for|of|pattern)",
    r"(security|reliability|performance|cost)\s+(considerations|recommendations|best)",
    r"waf\s+(pillar|framework|recommendation)",
    r"well.?architected",
    r"^what\s+is\s+the\s+(best|recommended)\s+(way|approach|pattern)",
];

const HOWTO_PATTERNS: &[&str] = &[
    r"^how\s+(do|can|should)\s+i\s+",
    r"^how\s+to\s+",
    r"^steps\s+to\s+",
    r"^guide\s+(to|for|on)\s+",
    r"^tutorial\s+(on|for)\s+",
    r"^help\s+me\s+(with|to)\s+",
    r"^walk\s+me\s+through\s+",
    r"^show\s+me\s+how\s+to\s+",
    r"^i\s+want\s+to\s+",
    r"^i\s+need\s+to\s+",
    r"^what\s+are\s+the\s+steps\s+",
];

const FACTUAL_PATTERNS: &[&str] = &[
    r"^what\s+(is|are)\s+",
    r"^explain\s+",
    r"^define\s+",
    r"^describe\s+",
    r"^tell\s+me\s+about\s+",
    r"^what\s+does\s+",
    r"^what\s+do\s+",
    r"^can\s+you\s+explain\s+",
    r"^what('s|\s+is)\s+the\s+(definition|meaning)\s+of",
    r"^overview\s+of\s+",
    r"^introduction\s+to\s+",
];

/// 按优先级排列的类别与模式组（factual 同时作为兜底）
const PRIORITY: [(QueryCategory, &[&str]); 5] = [
    (QueryCategory::Complex, COMPLEX_PATTERNS),
    (QueryCategory::Code, CODE_PATTERNS),
    (QueryCategory::Architecture, ARCHITECTURE_PATTERNS),
    (QueryCategory::Howto, HOWTO_PATTERNS),
    (QueryCategory::Factual, FACTUAL_PATTERNS),
];

static PATTERN_SETS: OnceLock<Vec<(QueryCategory, RegexSet)>> = OnceLock::new();

fn compile(patterns: &[&str]) -> RegexSet {
    let case_insensitive: Vec<String> = patterns.iter().map(|p| format!("(?i){p}")).collect();
    RegexSet::new(&case_insensitive).unwrap_or_else(|e| {
        tracing::error!("Failed to compile classifier patterns: {}", e);
        RegexSet::empty()
    })
}

fn pattern_sets() -> &'static [(QueryCategory, RegexSet)] {
    PATTERN_SETS.get_or_init(|| {
        PRIORITY
            .iter()
            .map(|(category, patterns)| (*category, compile(patterns)))
            .collect()
    })
}

/// 对查询分类；确定性、无副作用，可并发调用
pub fn classify(query: &str) -> QueryCategory {
    let query = query.trim();
    if query.is_empty() {
        return QueryCategory::Factual;
    }
    pattern_sets()
        .iter()
        .find(|(_, set)| set.is_match(query))
        .map(|(category, _)| *category)
        .unwrap_or(QueryCategory::Factual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        for (category, patterns) in PRIORITY {
            let set = pattern_sets()
                .iter()
                .find(|(c, _)| *c == category)
                .map(|(_, s)| s)
                .unwrap();
            assert_eq!(set.len(), patterns.len(), "{category} patterns");
        }
    }

    #[test]
    fn test_factual_queries() {
        for q in [
            "What is Azure Cosmos DB",
            "what are availability zones",
            "Explain managed identities",
            "Define RBAC",
            "describe the consumption plan",
            "  Tell me about Event Grid  ",
        ] {
            assert_eq!(classify(q), QueryCategory::Factual, "{q}");
        }
    }

    #[test]
    fn test_empty_and_unmatched_default_to_factual() {
        assert_eq!(classify(""), QueryCategory::Factual);
        assert_eq!(classify("   \n\t"), QueryCategory::Factual);
        assert_eq!(classify("storage account pricing"), QueryCategory::Factual);
    }

    #[test]
    fn test_complex_takes_priority() {
        for q in [
            "Explain Azure Functions and also write a deployment script",
            "Research private endpoints then generate a Bicep template",
            "What is AKS and generate a cluster config",
            "How do I secure storage? What about key rotation?",
            "Design a hub-spoke network and implement it in Terraform",
        ] {
            assert_eq!(classify(q), QueryCategory::Complex, "{q}");
        }
    }

    #[test]
    fn test_code_queries() {
        for q in [
            "Generate a Bicep template for a storage account",
            "Write a Python script that lists blobs",
            "terraform config for an app service",
            "Azure CLI command to create a resource group",
            "show me the code for uploading a file",
        ] {
            assert_eq!(classify(q), QueryCategory::Code, "{q}");
        }
    }

    #[test]
    fn test_architecture_queries() {
        for q in [
            "Best practices for securing AKS",
            "What is the recommended approach for multi-region failover",
            "security considerations for public APIs",
            "Which WAF pillar covers backups",
        ] {
            assert_eq!(classify(q), QueryCategory::Architecture, "{q}");
        }
    }

    #[test]
    fn test_howto_queries() {
        for q in [
            "How do I enable diagnostics logging",
            "how to rotate storage keys",
            "Walk me through setting up a VNet",
            "I need to migrate a SQL database",
        ] {
            assert_eq!(classify(q), QueryCategory::Howto, "{q}");
        }
    }

    #[test]
    fn test_category_table() {
        let factual = QueryCategory::Factual.config();
        assert!(factual.skip_pev);
        assert_eq!(factual.threshold, None);
        assert_eq!(factual.default_capability, Some(Capability::Lookup));

        let arch = QueryCategory::Architecture.config();
        assert_eq!(arch.max_iterations, 2);
        assert_eq!(arch.threshold, Some(0.75));
        assert_eq!(arch.early_accept_threshold, Some(0.90));
        assert_eq!(arch.max_plan_steps, 2);

        let code = QueryCategory::Code.config();
        assert_eq!(code.default_capability, Some(Capability::CodeGeneration));
        assert_eq!(code.max_plan_steps, 1);

        let complex = QueryCategory::Complex.config();
        assert_eq!(complex.default_capability, None);
        assert_eq!(complex.max_plan_steps, 3);
        assert_eq!(complex.early_accept_threshold, Some(0.80));

        for c in QueryCategory::ALL {
            assert!(!c.description().is_empty());
            assert_eq!(c.config().skip_pev, c == QueryCategory::Factual);
        }
    }
}
