use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde_json::{json, Map, Value};

use starsearch_ipc::{
    Capabilities, ClientConfig, EverythingMt, FieldValue, InfoKind, QueryRequest, RequestFlags,
    ResultSet, SearchFlags, Sort, GLOBAL_CONFIG,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "StarSearch Everything 查询工具（AI调用专用）", long_about = None)]
pub struct CliArgs {
    /// 搜索关键词
    #[arg(short = 'q', long = "query", required_unless_present = "info")]
    pub query: Option<String>,

    /// Everything 实例名（例如 1.5a）
    #[arg(short = 'i', long = "instance")]
    pub instance: Option<String>,

    /// 最大结果数（默认=10）
    #[arg(short = 'm', long = "max-results", default_value_t = 10)]
    pub max_results: u32,

    /// 跳过前 N 条结果
    #[arg(short = 'o', long = "offset", default_value_t = 0)]
    pub offset: u32,

    /// 区分大小写
    #[arg(long = "case")]
    pub match_case: bool,

    /// 全字匹配
    #[arg(long = "whole-word")]
    pub whole_word: bool,

    /// 匹配完整路径
    #[arg(long = "path")]
    pub match_path: bool,

    /// 正则表达式
    #[arg(long = "regex")]
    pub regex: bool,

    /// 区分重音符号（é 与 e 不同）
    #[arg(long = "accents")]
    pub match_accents: bool,

    /// 排序方式（1-26，默认=1 名称升序）
    #[arg(long = "sort", default_value_t = 1)]
    pub sort: u32,

    /// 等待回复的超时（毫秒）
    #[arg(short = 't', long = "timeout-ms", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// 只输出 Everything 版本与索引状态
    #[arg(long = "info")]
    pub info: bool,
}

impl CliArgs {
    fn search_flags(&self) -> SearchFlags {
        let mut flags = SearchFlags::NONE;
        if self.match_case {
            flags = flags | SearchFlags::MATCH_CASE;
        }
        if self.whole_word {
            flags = flags | SearchFlags::MATCH_WHOLE_WORD;
        }
        if self.match_path {
            flags = flags | SearchFlags::MATCH_PATH;
        }
        if self.regex {
            flags = flags | SearchFlags::REGEX;
        }
        if self.match_accents {
            flags = flags | SearchFlags::MATCH_ACCENTS;
        }
        flags
    }

    fn config(&self) -> ClientConfig {
        let mut config = GLOBAL_CONFIG.clone();
        if let Some(instance) = &self.instance {
            config.instance = Some(instance.clone());
        }
        config
    }
}

// CLI入口
pub async fn run_cli(args: CliArgs) -> anyhow::Result<()> {
    let config = args.config();
    let everything = EverythingMt::with_connector(
        starsearch_ipc::transport::default_connector(),
        config.clone(),
    )
    .context("初始化 Everything IPC 失败")?;

    let output = if args.info {
        info_json(&everything, &config)?
    } else {
        let query = args.query.clone().ok_or_else(|| anyhow!("缺少搜索关键词"))?;
        let sort = Sort::from_u32(args.sort).ok_or_else(|| anyhow!("无效的排序方式: {}", args.sort))?;
        let request = QueryRequest::new(query.clone())
            .search_flags(args.search_flags())
            .request(
                RequestFlags::FILE_NAME
                    | RequestFlags::PATH
                    | RequestFlags::SIZE
                    | RequestFlags::DATE_MODIFIED,
            )
            .sort(sort)
            .window(args.offset, args.max_results);

        let results = tokio::time::timeout(
            Duration::from_millis(args.timeout_ms),
            everything.query_send(&request),
        )
        .await
        .context("等待 Everything 回复超时")??;

        json!({
            "code": 0,
            "msg": "success",
            "query": query,
            "instance": config.instance,
            "found": results.found_num(),
            "returned": results.available_num(),
            "sort": results.sort(),
            "results": results_json(&results)?,
        })
    };

    // 输出JSON（AI易解析）
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn info_json(everything: &EverythingMt, config: &ClientConfig) -> anyhow::Result<Value> {
    if !everything.is_ipc_available()? {
        return Ok(json!({
            "code": 1,
            "msg": "Everything IPC 不可用",
            "instance": config.instance,
        }));
    }
    let version = everything.get_version().context("读取 Everything 版本失败")?;
    let mut indexed = Map::new();
    for kind in InfoKind::ALL {
        indexed.insert(format!("{:?}", kind), json!(everything.is_info_indexed(kind)?));
    }
    Ok(json!({
        "code": 0,
        "msg": "success",
        "instance": config.instance,
        "version": version.to_string(),
        "target_machine": version.target_machine,
        "db_loaded": everything.is_database_loaded()?,
        "indexed": indexed,
    }))
}

fn results_json(results: &ResultSet) -> anyhow::Result<Value> {
    let mut rows = Vec::with_capacity(results.len());
    for item in results.iter() {
        let mut row = Map::new();
        for field in item?.fields() {
            let (field, value) = field?;
            row.insert(format!("{:?}", field), field_json(&value));
        }
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

fn field_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(_) => json!(value.to_string_lossy()),
        FieldValue::Size(size) => json!(size),
        FieldValue::Date(time) => match time.to_datetime() {
            Some(dt) => json!(dt.to_rfc3339()),
            None => Value::Null,
        },
        FieldValue::Dword(dword) => json!(dword),
    }
}
