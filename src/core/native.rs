//! 远程原生文档（在线文档、表格、演示）的导出映射
//!
//! 这类文件在远程没有二进制内容，下载时需要导出成 Office 格式。

/// 远程文件夹的 MIME 类型
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// 原生文档的 MIME 前缀
const NATIVE_PREFIX: &str = "application/vnd.google-apps.";

/// 原生文档的导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    pub native_mime: &'static str,
    pub export_mime: &'static str,
    pub extension: &'static str,
}

const EXPORT_FORMATS: &[ExportFormat] = &[
    ExportFormat {
        native_mime: "application/vnd.google-apps.document",
        export_mime: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        extension: ".docx",
    },
    ExportFormat {
        native_mime: "application/vnd.google-apps.spreadsheet",
        export_mime: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        extension: ".xlsx",
    },
    ExportFormat {
        native_mime: "application/vnd.google-apps.presentation",
        export_mime: "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        extension: ".pptx",
    },
];

/// 是否是远程原生类型（包括无法导出的类型）
pub fn is_native(mime_type: &str) -> bool {
    mime_type.starts_with(NATIVE_PREFIX)
}

/// 查找导出格式
pub fn export_format(mime_type: &str) -> Option<&'static ExportFormat> {
    EXPORT_FORMATS.iter().find(|f| f.native_mime == mime_type)
}

/// 远程文件在本地对应的文件名
///
/// 原生文档在没有对应扩展名时追加扩展名，其它文件保持原名。
pub fn local_name(remote_name: &str, mime_type: &str) -> String {
    match export_format(mime_type) {
        Some(format) if !remote_name.ends_with(format.extension) => {
            format!("{}{}", remote_name, format.extension)
        }
        _ => remote_name.to_string(),
    }
}
