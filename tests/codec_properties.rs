//! 编解码的性质测试：任意字段组合下按固定顺序跳读都能取回写入的值

use proptest::prelude::*;

use starsearch_ipc::codec::{decode_query, encode_query};
use starsearch_ipc::{
    FieldType, FieldValue, FileTime, QueryRequest, ReplyBuilder, RequestFlags, ResultSet,
    SearchFlags, Sort,
};

fn value_for(ty: FieldType) -> BoxedStrategy<FieldValue> {
    match ty {
        FieldType::Text => "\\PC{0,16}".prop_map(|s| FieldValue::text(&s)).boxed(),
        FieldType::Size => any::<u64>().prop_map(FieldValue::Size).boxed(),
        FieldType::Date => any::<u64>()
            .prop_map(|v| FieldValue::Date(FileTime(v)))
            .boxed(),
        FieldType::Dword => any::<u32>().prop_map(FieldValue::Dword).boxed(),
    }
}

/// 字段位组合以及符合该组合的若干行
fn reply_rows() -> impl Strategy<Value = (RequestFlags, Vec<Vec<FieldValue>>)> {
    (0u32..=0xFFFF).prop_flat_map(|bits| {
        let flags = RequestFlags(bits);
        let row: Vec<BoxedStrategy<FieldValue>> =
            flags.fields().map(|f| value_for(f.field_type())).collect();
        (Just(flags), prop::collection::vec(row, 0..6))
    })
}

fn query_request() -> impl Strategy<Value = QueryRequest> {
    (
        "\\PC{0,32}",
        any::<u32>(),
        0u32..0x20,
        any::<u32>(),
        any::<u32>(),
        0u32..=0xFFFF,
        1u32..=26,
    )
        .prop_map(|(search, id, search_flags, offset, max, request, sort)| {
            QueryRequest::new(search)
                .id(id)
                .search_flags(SearchFlags(search_flags))
                .request(RequestFlags(request))
                .sort(Sort::from_u32(sort).unwrap_or_default())
                .window(offset, max)
        })
}

proptest! {
    #[test]
    fn prop_every_field_reads_back((flags, rows) in reply_rows()) {
        let mut builder = ReplyBuilder::new(flags);
        for row in &rows {
            builder = builder.row(row.clone());
        }
        let results = ResultSet::from_reply(7, builder.build()).unwrap();

        prop_assert_eq!(results.len(), rows.len());
        prop_assert_eq!(results.request_flags(), flags);
        for (index, expected) in rows.iter().enumerate() {
            let item = results.get(index).unwrap();
            // 随机访问：每个字段都要从行首跳过前面的字段
            for (field, value) in flags.fields().zip(expected) {
                prop_assert_eq!(&item.get(field).unwrap(), value);
            }
            // 顺序扫描
            let scanned: Vec<FieldValue> = item
                .fields()
                .map(|f| f.map(|(_, v)| v))
                .collect::<Result<_, _>>()
                .unwrap();
            prop_assert_eq!(&scanned, expected);
        }
    }

    #[test]
    fn prop_query_header_decodes_to_same_request(request in query_request(), endpoint in any::<u32>()) {
        let bytes = encode_query(&request, endpoint);
        prop_assert_eq!(bytes.len(), 28 + (request.search.encode_utf16().count() + 1) * 2);

        let (decoded_endpoint, decoded) = decode_query(&bytes).unwrap();
        prop_assert_eq!(decoded_endpoint, endpoint);
        prop_assert_eq!(decoded, request);
    }

    #[test]
    fn prop_truncated_reply_never_panics((flags, rows) in reply_rows(), cut in any::<prop::sample::Index>()) {
        let mut builder = ReplyBuilder::new(flags);
        for row in &rows {
            builder = builder.row(row.clone());
        }
        let full = builder.build();
        let bytes = full[..cut.index(full.len() + 1)].to_vec();

        if let Ok(results) = ResultSet::from_reply(0, bytes) {
            for item in results.iter() {
                if let Ok(item) = item {
                    for field in item.fields() {
                        let _ = field;
                    }
                }
            }
        }
    }
}
