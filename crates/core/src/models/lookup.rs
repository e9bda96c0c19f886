/// 带标签的查找结果
///
/// 代替“用异常区分未找到与已过期”的写法，让调用方显式处理三种情况。
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// 找到并且满足预期状态
    Found(T),
    /// 记录不存在
    NotFound,
    /// 记录存在，但状态已被其他调用方改变（例如已被认领）
    Stale,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound | Lookup::Stale => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Stale => Lookup::Stale,
        }
    }
}
