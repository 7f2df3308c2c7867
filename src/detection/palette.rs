//! 类别颜色与图标
use phf::phf_map;

/// 类别颜色 (RGB)
static CLASS_COLORS: phf::Map<&'static str, [u8; 3]> = phf_map! {
    "soldier" => [255, 0, 0],     // 红色
    "civilian" => [0, 255, 0],    // 绿色
    "person" => [0, 0, 255],      // 蓝色
    "combatant" => [255, 165, 0], // 橙色
    "folks" => [0, 255, 255],     // 青色
};

/// 类别图标 (结果面板使用)
static CLASS_EMOJIS: phf::Map<&'static str, &'static str> = phf_map! {
    "soldier" => "🔴",
    "civilian" => "🟢",
    "person" => "🔵",
    "combatant" => "🟠",
    "folks" => "🟡",
};

/// 图例顺序
pub const KNOWN_CLASSES: [&str; 5] = ["soldier", "civilian", "person", "combatant", "folks"];

pub const DEFAULT_COLOR: [u8; 3] = [255, 255, 255];
pub const DEFAULT_EMOJI: &str = "⚪";

/// 按类别名称查找颜色 (不区分大小写), 未知类别为白色
pub fn class_color(label: &str) -> [u8; 3] {
    CLASS_COLORS
        .get(label.to_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_COLOR)
}

pub fn class_emoji(label: &str) -> &'static str {
    CLASS_EMOJIS
        .get(label.to_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_EMOJI)
}
