/// 为以 TEXT 存储的状态枚举实现 SQLite 编解码
///
/// 枚举需要提供 `as_str()` 以及 `FromStr` 实现。子模块声明在宏之后，按文本作用域直接可用。
macro_rules! impl_sqlite_text_enum {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Sqlite> for $ty {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <str as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                s.parse::<$ty>().map_err(Into::into)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
            }
        }
    };
}

pub mod lookup;
pub mod mapping;
pub mod object;
pub mod report;
pub mod scheduled_task;
pub mod task_log;
pub mod time_period;
pub mod workflow;

pub use lookup::*;
pub use mapping::*;
pub use object::*;
pub use report::*;
pub use scheduled_task::*;
pub use task_log::*;
pub use time_period::*;
pub use workflow::*;

/// 传递给任务实现的配置（不透明的键值对）
pub type TaskConfiguration = serde_json::Map<String, serde_json::Value>;
