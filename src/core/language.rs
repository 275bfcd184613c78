//! Document language profiles.
//!
//! Generated documents are written in one profile per repository. The profile comes
//! from the policy's `language` block; without one it is inferred from the headings
//! of existing built-in documents, and defaults to English.

use crate::core::policy::LanguageSettings;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PRIMARY_LANGUAGE: &str = "en-US";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    #[default]
    #[serde(rename = "en-US")]
    EnUs,
    #[serde(rename = "zh-CN")]
    ZhCn,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::EnUs, Profile::ZhCn];

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::EnUs => "en-US",
            Profile::ZhCn => "zh-CN",
        }
    }

    /// `zh*` tags map to Chinese; every other tag falls back to English.
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().to_ascii_lowercase().starts_with("zh") {
            Profile::ZhCn
        } else {
            Profile::EnUs
        }
    }

    fn pick(self, text: [&'static str; 2]) -> &'static str {
        match self {
            Profile::EnUs => text[0],
            Profile::ZhCn => text[1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageSource {
    PolicyLocked,
    Policy,
    Inferred,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLanguage {
    pub primary: String,
    pub profile: Profile,
    pub source: LanguageSource,
}

impl Default for ResolvedLanguage {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY_LANGUAGE.to_string(),
            profile: Profile::EnUs,
            source: LanguageSource::Default,
        }
    }
}

/// Resolves the working language. An explicit `profile` wins over the one implied
/// by `primary`; `inferred` is only consulted when the policy names no primary.
pub fn resolve(settings: &LanguageSettings, inferred: Option<Profile>) -> ResolvedLanguage {
    let primary = settings.primary.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let (primary, source) = match (primary, inferred) {
        (Some(p), _) if settings.locked => (p.to_string(), LanguageSource::PolicyLocked),
        (Some(p), _) => (p.to_string(), LanguageSource::Policy),
        (None, Some(profile)) => (profile.as_str().to_string(), LanguageSource::Inferred),
        (None, None) => (DEFAULT_PRIMARY_LANGUAGE.to_string(), LanguageSource::Default),
    };
    let profile = settings
        .profile
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(Profile::from_tag)
        .unwrap_or_else(|| Profile::from_tag(&primary));
    ResolvedLanguage {
        primary,
        profile,
        source,
    }
}

struct Section {
    id: &'static str,
    /// Heading line per profile, English first.
    heading: [&'static str; 2],
    body: [&'static str; 2],
}

impl Section {
    fn render(&self, profile: Profile) -> String {
        let body = profile.pick(self.body);
        if body.is_empty() {
            profile.pick(self.heading).to_string()
        } else {
            format!("{}\n\n{body}", profile.pick(self.heading))
        }
    }
}

pub struct BuiltinDoc {
    pub path: &'static str,
    pub required_sections: &'static [&'static str],
    sections: &'static [Section],
}

const BUILTIN_DOCS: &[BuiltinDoc] = &[
    BuiltinDoc {
        path: "docs/index.md",
        required_sections: &["title", "core_docs", "workflow"],
        sections: &[
            Section {
                id: "title",
                heading: ["# Documentation Index", "# 文档索引"],
                body: ["", ""],
            },
            Section {
                id: "core_docs",
                heading: ["## Core Documents", "## 核心文档"],
                body: ["", ""],
            },
            Section {
                id: "workflow",
                heading: ["## Operational Workflow", "## 操作流程"],
                body: [
                    "1. Run `docsor scan` and `docsor plan`.\n2. Review actions and apply with `docsor apply --mode apply-safe`.\n3. Run `docsor validate` before merge.",
                    "1. 运行 `docsor scan` 与 `docsor plan`。\n2. 审阅 actions 后执行 `docsor apply --mode apply-safe`。\n3. 合并前运行 `docsor validate`。",
                ],
            },
        ],
    },
    BuiltinDoc {
        path: "docs/architecture.md",
        required_sections: &["title", "module_inventory", "dependency_manifests"],
        sections: &[
            Section {
                id: "title",
                heading: ["# Repository Architecture", "# 仓库架构"],
                body: ["", ""],
            },
            Section {
                id: "summary",
                heading: ["## Summary", "## 概述"],
                body: [
                    "Describe the repository boundaries and execution model.",
                    "说明仓库边界与执行模型。",
                ],
            },
            Section {
                id: "module_inventory",
                heading: ["## Module Inventory", "## 模块清单"],
                body: [
                    "List top-level modules and their responsibilities.",
                    "列出顶层 modules 及其职责。",
                ],
            },
            Section {
                id: "dependency_manifests",
                heading: ["## Dependency Manifests", "## 依赖清单"],
                body: [
                    "List build/dependency manifests used by this repository.",
                    "列出构建与 dependency manifests。",
                ],
            },
        ],
    },
    BuiltinDoc {
        path: "docs/runbook.md",
        required_sections: &["title", "dev_commands", "validation_commands"],
        sections: &[
            Section {
                id: "title",
                heading: ["# Runbook", "# 运行手册"],
                body: ["", ""],
            },
            Section {
                id: "dev_commands",
                heading: ["## Development Commands", "## 开发命令"],
                body: [
                    "Document build, run, and local workflow commands.",
                    "记录 build、run 与本地开发工作流命令。",
                ],
            },
            Section {
                id: "validation_commands",
                heading: ["## Validation Commands", "## 校验命令"],
                body: [
                    "Document lint, test, and drift check commands.",
                    "记录 lint、test 与 drift check 命令。",
                ],
            },
        ],
    },
    BuiltinDoc {
        path: "docs/glossary.md",
        required_sections: &["title"],
        sections: &[Section {
            id: "title",
            heading: ["# Glossary", "# 术语表"],
            body: [
                "Document repository-specific terminology.",
                "记录仓库特有术语、缩写与上下文定义。",
            ],
        }],
    },
    BuiltinDoc {
        path: "docs/incident-response.md",
        required_sections: &["title", "severity_levels", "response_flow", "postmortem"],
        sections: &[
            Section {
                id: "title",
                heading: ["# Incident Response", "# 事故响应"],
                body: ["", ""],
            },
            Section {
                id: "severity_levels",
                heading: ["## Severity Levels", "## 严重级别"],
                body: [
                    "- `SEV1`: Core functionality unavailable, immediate response required.\n- `SEV2`: Key functionality degraded, urgent mitigation required.\n- `SEV3`: Limited impact, plan and track remediation.",
                    "- `SEV1`：核心功能不可用，需要立即响应。\n- `SEV2`：关键功能受影响，需要尽快修复。\n- `SEV3`：局部影响，可按计划处理。",
                ],
            },
            Section {
                id: "response_flow",
                heading: ["## Response Flow", "## 响应流程"],
                body: [
                    "1. Trigger alert and confirm incident commander.\n2. Create incident channel and capture timeline.\n3. Execute mitigation and publish status updates.\n4. After recovery, start postmortem workflow.",
                    "1. 触发告警并确认值班负责人。\n2. 建立事件频道并记录时间线。\n3. 执行缓解动作并持续同步状态。\n4. 恢复服务后进入复盘流程。",
                ],
            },
            Section {
                id: "postmortem",
                heading: ["## Postmortem Requirements", "## 复盘要求"],
                body: [
                    "- Document root cause, impact scope, recovery timeline, and action items.\n- Track each action item with an owner in the task system.",
                    "- 记录根因、影响范围、恢复时间与改进项。\n- 改进项必须进入可追踪任务系统并指定 owner。",
                ],
            },
        ],
    },
    BuiltinDoc {
        path: "docs/security.md",
        required_sections: &["title", "threat_model", "security_controls", "vuln_management"],
        sections: &[
            Section {
                id: "title",
                heading: ["# Security Baseline", "# 安全基线"],
                body: ["", ""],
            },
            Section {
                id: "threat_model",
                heading: ["## Threat Model", "## 威胁模型"],
                body: [
                    "Describe critical assets, threat actors, attack surfaces, and risk assumptions.",
                    "描述关键资产、威胁来源、攻击面与主要风险假设。",
                ],
            },
            Section {
                id: "security_controls",
                heading: ["## Security Controls", "## 安全控制"],
                body: [
                    "- Authentication and authorization policy\n- Secret and credential management\n- Dependency and image scanning policy",
                    "- 认证与授权策略\n- 密钥与凭据管理\n- 依赖与镜像扫描策略",
                ],
            },
            Section {
                id: "vuln_management",
                heading: ["## Vulnerability Management", "## 漏洞管理"],
                body: [
                    "Define vulnerability severity levels, response SLA, remediation verification, and disclosure workflow.",
                    "定义漏洞分级、响应 SLA、修复验证与披露流程。",
                ],
            },
        ],
    },
    BuiltinDoc {
        path: "docs/compliance.md",
        required_sections: &["title", "framework_scope", "control_mapping", "evidence_retention"],
        sections: &[
            Section {
                id: "title",
                heading: ["# Compliance Controls", "# 合规控制"],
                body: ["", ""],
            },
            Section {
                id: "framework_scope",
                heading: ["## Framework Scope", "## 框架范围"],
                body: [
                    "List applicable frameworks (for example SOC2, ISO27001, GDPR) and system boundaries in scope.",
                    "记录适用的合规框架（如 SOC2、ISO27001、GDPR）及适用边界。",
                ],
            },
            Section {
                id: "control_mapping",
                heading: ["## Control Mapping", "## 控制映射"],
                body: [
                    "Map key controls to implementation locations, owners, and validation methods.",
                    "将关键控制项映射到实现位置、责任人和验证方式。",
                ],
            },
            Section {
                id: "evidence_retention",
                heading: ["## Evidence Retention", "## 证据留存"],
                body: [
                    "Define audit evidence sources, retention windows, access controls, and sampling process.",
                    "定义审计证据的来源、保存周期、访问权限和抽样方式。",
                ],
            },
        ],
    },
];

pub fn builtin(rel: &str) -> Option<&'static BuiltinDoc> {
    BUILTIN_DOCS.iter().find(|d| d.path == rel)
}

impl BuiltinDoc {
    fn section(&self, id: &str) -> Option<&'static Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn heading(&self, id: &str, profile: Profile) -> Option<&'static str> {
        self.section(id).map(|s| profile.pick(s.heading))
    }

    /// One section as its heading plus optional body; empty for unknown ids.
    pub fn render_section(&self, id: &str, profile: Profile) -> String {
        self.section(id).map(|s| s.render(profile)).unwrap_or_default()
    }

    /// Sections in template order, each as `heading` plus optional body.
    pub fn render(&self, profile: Profile) -> String {
        let blocks: Vec<String> = self.sections.iter().map(|s| s.render(profile)).collect();
        format!("{}\n", blocks.join("\n\n"))
    }
}

/// Profile whose built-in headings dominate the existing documents. Ties go to Chinese,
/// since English headings are also common inside Chinese documents.
pub fn infer_from_docs<F>(read: F) -> Option<Profile>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut en, mut zh) = (0usize, 0usize);
    for rel in ["docs/index.md", "docs/architecture.md", "docs/runbook.md", "docs/glossary.md"] {
        let (Some(doc), Some(text)) = (builtin(rel), read(rel)) else {
            continue;
        };
        for id in doc.required_sections {
            let Some([en_heading, zh_heading]) = doc.section(id).map(|s| s.heading) else {
                continue;
            };
            if text.contains(en_heading) {
                en += 1;
            }
            if text.contains(zh_heading) {
                zh += 1;
            }
        }
    }
    match (en, zh) {
        (0, 0) => None,
        (en, zh) if zh >= en => Some(Profile::ZhCn),
        _ => Some(Profile::EnUs),
    }
}

pub fn module_line(module: &str, profile: Profile) -> String {
    match profile {
        Profile::EnUs => format!("- `{module}`: TODO define responsibility."),
        Profile::ZhCn => format!("- `{module}`：TODO 补充职责说明。"),
    }
}

pub fn module_inventory_heading(profile: Profile) -> &'static str {
    builtin("docs/architecture.md")
        .and_then(|d| d.heading("module_inventory", profile))
        .unwrap_or("## Module Inventory")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(primary: Option<&str>, profile: Option<&str>, locked: bool) -> LanguageSettings {
        LanguageSettings {
            primary: primary.map(str::to_string),
            profile: profile.map(str::to_string),
            locked,
            ..LanguageSettings::default()
        }
    }

    #[test]
    fn test_resolve_prefers_policy_then_inferred_then_default() {
        let locked = resolve(&settings(Some("zh-TW"), None, true), Some(Profile::EnUs));
        assert_eq!(locked.profile, Profile::ZhCn);
        assert_eq!(locked.source, LanguageSource::PolicyLocked);

        let explicit = resolve(&settings(Some("zh-CN"), Some("en-US"), false), None);
        assert_eq!(explicit.profile, Profile::EnUs);
        assert_eq!(explicit.source, LanguageSource::Policy);

        let inferred = resolve(&settings(None, None, true), Some(Profile::ZhCn));
        assert_eq!(inferred.primary, "zh-CN");
        assert_eq!(inferred.source, LanguageSource::Inferred);

        assert_eq!(resolve(&LanguageSettings::default(), None), ResolvedLanguage::default());
    }

    #[test]
    fn test_unknown_tags_fall_back_to_english() {
        assert_eq!(Profile::from_tag("fr-FR"), Profile::EnUs);
        assert_eq!(Profile::from_tag(" ZH "), Profile::ZhCn);
    }

    #[test]
    fn test_infer_counts_builtin_headings() {
        let zh = |rel: &str| (rel == "docs/runbook.md").then(|| "# 运行手册\n\n## 开发命令\n".to_string());
        assert_eq!(infer_from_docs(zh), Some(Profile::ZhCn));
        let en = |rel: &str| (rel == "docs/index.md").then(|| "# Documentation Index\n".to_string());
        assert_eq!(infer_from_docs(en), Some(Profile::EnUs));
        assert_eq!(infer_from_docs(|_| Some("# Index\n".to_string())), None);
    }

    #[test]
    fn test_builtin_render_follows_profile() {
        let runbook = builtin("docs/runbook.md").unwrap();
        let en = runbook.render(Profile::EnUs);
        assert!(en.starts_with("# Runbook\n\n## Development Commands\n\nDocument build"));
        let zh = runbook.render(Profile::ZhCn);
        assert!(zh.contains("## 校验命令"));
        let index = builtin("docs/index.md").unwrap();
        assert!(index.render_section("workflow", Profile::EnUs).starts_with("## Operational Workflow\n\n1. Run `docsor scan`"));
        assert_eq!(index.render_section("missing", Profile::EnUs), "");
        assert!(builtin("docs/notes.md").is_none());
    }
}
