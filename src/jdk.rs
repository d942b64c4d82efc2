//! Signature table for the standard-library types obfuscated code commonly extends.
//!
//! Only declared methods that can be overridden are listed; walking `supers`
//! gives the inherited ones.

/// A standard-library class or interface.
struct JdkClass {
    name: &'static str,
    supers: &'static [&'static str],
    /// `name` immediately followed by the method descriptor.
    methods: &'static [&'static str],
}

const OBJECT: &str = "java/lang/Object";

static JDK_CLASSES: &[JdkClass] = &[
    JdkClass {
        name: OBJECT,
        supers: &[],
        methods: &[
            "equals(Ljava/lang/Object;)Z",
            "hashCode()I",
            "toString()Ljava/lang/String;",
            "clone()Ljava/lang/Object;",
            "finalize()V",
        ],
    },
    JdkClass {
        name: "java/lang/Runnable",
        supers: &[OBJECT],
        methods: &["run()V"],
    },
    JdkClass {
        name: "java/lang/Thread",
        supers: &[OBJECT, "java/lang/Runnable"],
        methods: &["run()V", "start()V", "interrupt()V"],
    },
    JdkClass {
        name: "java/lang/Comparable",
        supers: &[OBJECT],
        methods: &["compareTo(Ljava/lang/Object;)I"],
    },
    JdkClass {
        name: "java/util/Comparator",
        supers: &[OBJECT],
        methods: &["compare(Ljava/lang/Object;Ljava/lang/Object;)I", "equals(Ljava/lang/Object;)Z"],
    },
    JdkClass {
        name: "java/lang/Iterable",
        supers: &[OBJECT],
        methods: &["iterator()Ljava/util/Iterator;"],
    },
    JdkClass {
        name: "java/util/Iterator",
        supers: &[OBJECT],
        methods: &["hasNext()Z", "next()Ljava/lang/Object;", "remove()V"],
    },
    JdkClass {
        name: "java/util/Collection",
        supers: &["java/lang/Iterable"],
        methods: &[
            "size()I",
            "isEmpty()Z",
            "contains(Ljava/lang/Object;)Z",
            "toArray()[Ljava/lang/Object;",
            "toArray([Ljava/lang/Object;)[Ljava/lang/Object;",
            "add(Ljava/lang/Object;)Z",
            "remove(Ljava/lang/Object;)Z",
            "containsAll(Ljava/util/Collection;)Z",
            "addAll(Ljava/util/Collection;)Z",
            "removeAll(Ljava/util/Collection;)Z",
            "retainAll(Ljava/util/Collection;)Z",
            "clear()V",
        ],
    },
    JdkClass {
        name: "java/util/List",
        supers: &["java/util/Collection"],
        methods: &[
            "get(I)Ljava/lang/Object;",
            "set(ILjava/lang/Object;)Ljava/lang/Object;",
            "add(ILjava/lang/Object;)V",
            "remove(I)Ljava/lang/Object;",
            "indexOf(Ljava/lang/Object;)I",
        ],
    },
    JdkClass {
        name: "java/util/Set",
        supers: &["java/util/Collection"],
        methods: &[],
    },
    JdkClass {
        name: "java/util/Map",
        supers: &[OBJECT],
        methods: &[
            "size()I",
            "isEmpty()Z",
            "get(Ljava/lang/Object;)Ljava/lang/Object;",
            "put(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
            "remove(Ljava/lang/Object;)Ljava/lang/Object;",
            "containsKey(Ljava/lang/Object;)Z",
            "keySet()Ljava/util/Set;",
            "values()Ljava/util/Collection;",
            "entrySet()Ljava/util/Set;",
            "clear()V",
        ],
    },
    JdkClass {
        name: "java/lang/AutoCloseable",
        supers: &[OBJECT],
        methods: &["close()V"],
    },
    JdkClass {
        name: "java/io/Closeable",
        supers: &["java/lang/AutoCloseable"],
        methods: &["close()V"],
    },
    JdkClass {
        name: "java/io/InputStream",
        supers: &[OBJECT, "java/io/Closeable"],
        methods: &["read()I", "read([B)I", "read([BII)I", "available()I", "skip(J)J", "close()V"],
    },
    JdkClass {
        name: "java/io/OutputStream",
        supers: &[OBJECT, "java/io/Closeable"],
        methods: &["write(I)V", "write([B)V", "write([BII)V", "flush()V", "close()V"],
    },
    JdkClass {
        name: "java/lang/Exception",
        supers: &["java/lang/Throwable"],
        methods: &[],
    },
    JdkClass {
        name: "java/lang/RuntimeException",
        supers: &["java/lang/Exception"],
        methods: &[],
    },
    JdkClass {
        name: "java/lang/Throwable",
        supers: &[OBJECT],
        methods: &[
            "getMessage()Ljava/lang/String;",
            "getCause()Ljava/lang/Throwable;",
            "fillInStackTrace()Ljava/lang/Throwable;",
        ],
    },
    JdkClass {
        name: "java/awt/Component",
        supers: &[OBJECT, "java/awt/image/ImageObserver"],
        methods: &[
            "paint(Ljava/awt/Graphics;)V",
            "update(Ljava/awt/Graphics;)V",
            "repaint()V",
            "setSize(II)V",
            "getPreferredSize()Ljava/awt/Dimension;",
            "addNotify()V",
            "removeNotify()V",
        ],
    },
    JdkClass {
        name: "java/awt/Container",
        supers: &["java/awt/Component"],
        methods: &["paint(Ljava/awt/Graphics;)V", "update(Ljava/awt/Graphics;)V", "doLayout()V"],
    },
    JdkClass {
        name: "java/awt/Canvas",
        supers: &["java/awt/Component"],
        methods: &["paint(Ljava/awt/Graphics;)V", "update(Ljava/awt/Graphics;)V"],
    },
    JdkClass {
        name: "java/awt/Panel",
        supers: &["java/awt/Container"],
        methods: &[],
    },
    JdkClass {
        name: "java/awt/Frame",
        supers: &["java/awt/Container"],
        methods: &["setTitle(Ljava/lang/String;)V"],
    },
    JdkClass {
        name: "java/applet/Applet",
        supers: &["java/awt/Panel"],
        methods: &[
            "init()V",
            "start()V",
            "stop()V",
            "destroy()V",
            "getParameter(Ljava/lang/String;)Ljava/lang/String;",
            "getAppletContext()Ljava/applet/AppletContext;",
        ],
    },
    JdkClass {
        name: "java/awt/image/ImageObserver",
        supers: &[OBJECT],
        methods: &["imageUpdate(Ljava/awt/Image;IIIII)Z"],
    },
    JdkClass {
        name: "java/awt/image/ImageProducer",
        supers: &[OBJECT],
        methods: &[
            "addConsumer(Ljava/awt/image/ImageConsumer;)V",
            "isConsumer(Ljava/awt/image/ImageConsumer;)Z",
            "removeConsumer(Ljava/awt/image/ImageConsumer;)V",
            "startProduction(Ljava/awt/image/ImageConsumer;)V",
            "requestTopDownLeftRightResend(Ljava/awt/image/ImageConsumer;)V",
        ],
    },
    JdkClass {
        name: "java/awt/event/KeyListener",
        supers: &[OBJECT],
        methods: &[
            "keyTyped(Ljava/awt/event/KeyEvent;)V",
            "keyPressed(Ljava/awt/event/KeyEvent;)V",
            "keyReleased(Ljava/awt/event/KeyEvent;)V",
        ],
    },
    JdkClass {
        name: "java/awt/event/MouseListener",
        supers: &[OBJECT],
        methods: &[
            "mouseClicked(Ljava/awt/event/MouseEvent;)V",
            "mousePressed(Ljava/awt/event/MouseEvent;)V",
            "mouseReleased(Ljava/awt/event/MouseEvent;)V",
            "mouseEntered(Ljava/awt/event/MouseEvent;)V",
            "mouseExited(Ljava/awt/event/MouseEvent;)V",
        ],
    },
    JdkClass {
        name: "java/awt/event/MouseMotionListener",
        supers: &[OBJECT],
        methods: &[
            "mouseDragged(Ljava/awt/event/MouseEvent;)V",
            "mouseMoved(Ljava/awt/event/MouseEvent;)V",
        ],
    },
    JdkClass {
        name: "java/awt/event/MouseWheelListener",
        supers: &[OBJECT],
        methods: &["mouseWheelMoved(Ljava/awt/event/MouseWheelEvent;)V"],
    },
    JdkClass {
        name: "java/awt/event/FocusListener",
        supers: &[OBJECT],
        methods: &[
            "focusGained(Ljava/awt/event/FocusEvent;)V",
            "focusLost(Ljava/awt/event/FocusEvent;)V",
        ],
    },
    JdkClass {
        name: "java/awt/event/WindowListener",
        supers: &[OBJECT],
        methods: &[
            "windowOpened(Ljava/awt/event/WindowEvent;)V",
            "windowClosing(Ljava/awt/event/WindowEvent;)V",
            "windowClosed(Ljava/awt/event/WindowEvent;)V",
            "windowIconified(Ljava/awt/event/WindowEvent;)V",
            "windowDeiconified(Ljava/awt/event/WindowEvent;)V",
            "windowActivated(Ljava/awt/event/WindowEvent;)V",
            "windowDeactivated(Ljava/awt/event/WindowEvent;)V",
        ],
    },
];

fn find(name: &str) -> Option<&'static JdkClass> {
    JDK_CLASSES.iter().find(|class| class.name == name)
}

/// True when `class_name` (or any standard-library ancestor of it) declares
/// a method with this name and descriptor.
pub(crate) fn is_jdk_method(class_name: &str, name: &str, descriptor: &str) -> bool {
    let signature = format!("{name}{descriptor}");
    let mut pending = vec![class_name];
    let mut seen = Vec::new();
    while let Some(current) = pending.pop() {
        if seen.contains(&current) {
            continue;
        }
        seen.push(current);
        let Some(class) = find(current) else {
            continue;
        };
        if class.methods.contains(&signature.as_str()) {
            return true;
        }
        pending.extend(class.supers.iter().copied());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_declared_and_inherited_methods() {
        assert!(is_jdk_method("java/lang/Object", "hashCode", "()I"));
        assert!(is_jdk_method("java/applet/Applet", "paint", "(Ljava/awt/Graphics;)V"));
        assert!(is_jdk_method("java/util/List", "size", "()I"));
    }

    #[test]
    fn rejects_unknown_signatures_and_classes() {
        assert!(!is_jdk_method("java/lang/Object", "hashCode", "(I)I"));
        assert!(!is_jdk_method("client/Unknown", "run", "()V"));
    }
}
